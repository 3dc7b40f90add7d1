//! Version comparison for add-on replacement decisions
//!
//! An add-on build is identified by its semantic version, an opaque variant
//! id (a catalog may publish per-Kubernetes-release variants of the same
//! version), and a hash of the rendered manifest. [`AddonVersion::replaces`]
//! is the single replacement rule used when selecting winners within one
//! catalog and when deciding whether an installed add-on needs an update.

use std::cmp::Ordering;
use std::fmt;

use semver::{Version, VersionReq};

use crate::{Error, Result};

/// Identity of one published add-on build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonVersion {
    /// Semantic version of the add-on; validated at catalog parse time
    pub version: Version,
    /// Opaque variant id; empty means unset, and counts as a value
    pub variant: String,
    /// Hash of the rendered manifest; empty means unknown
    pub manifest_hash: String,
}

impl AddonVersion {
    /// Create an identity with an empty variant id and manifest hash
    pub fn new(version: Version) -> Self {
        Self {
            version,
            variant: String::new(),
            manifest_hash: String::new(),
        }
    }

    /// Decide whether this build replaces `old` on the cluster.
    ///
    /// Evaluated in order:
    /// 1. Differing variant ids always replace, regardless of version order.
    ///    Switching the implementation variant is authoritative.
    /// 2. Same variant: strictly newer semver replaces, older does not.
    /// 3. Equal version and variant: replace iff the manifest hashes differ.
    ///    An empty hash is distinct from any non-empty hash, so a catalog can
    ///    re-publish corrected content under an unchanged version number.
    ///
    /// Total: never fails on validated inputs. Not a complement of the
    /// reversed call; rules 1 and 3 can return true for either ordering.
    pub fn replaces(&self, old: &AddonVersion) -> bool {
        if self.variant != old.variant {
            return true;
        }
        match self.version.cmp(&old.version) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.manifest_hash != old.manifest_hash,
        }
    }
}

impl fmt::Display for AddonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Version={} Variant={} ManifestHash={}",
            self.version, self.variant, self.manifest_hash
        )
    }
}

/// Check a Kubernetes version against a space-separated conjunction of
/// semver comparator clauses, e.g. `">=1.4.0 <1.6.0"`.
///
/// Every clause is parsed before any is evaluated, so a syntactically invalid
/// clause is always surfaced as an error rather than short-circuited away.
/// An empty constraint matches every version.
pub fn version_matches(constraint: &str, cluster_version: &Version) -> Result<bool> {
    let mut clauses = Vec::new();
    for clause in constraint.split_whitespace() {
        let req = VersionReq::parse(clause)
            .map_err(|e| Error::invalid_constraint(constraint, e.to_string()))?;
        clauses.push(req);
    }
    Ok(clauses.iter().all(|req| req.matches(cluster_version)))
}

/// Parse a full `major.minor.patch` version string, attributing failures to
/// the named add-on with the parser message surfaced verbatim.
pub fn parse_addon_version(addon: &str, version: &str) -> Result<Version> {
    Version::parse(version).map_err(|e| Error::invalid_version(addon, version, e.to_string()))
}
