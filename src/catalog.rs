//! Add-on catalog parsing and single-source winner selection
//!
//! A catalog is a YAML document listing the add-ons one channel publishes.
//! Parsing is fail-fast: a single record with an unparseable version
//! invalidates the whole catalog, since a partially-loaded catalog is unsafe
//! to apply.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::menu::{Addon, AddonMenu};
use crate::version::{parse_addon_version, version_matches, AddonVersion};
use crate::{Error, Result};

/// Which nodes must be restarted after an add-on update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollingUpdateScope {
    /// No nodes need a restart
    #[default]
    None,
    /// Every node needs a restart
    All,
    /// Only nodes carrying the control-plane role marker
    ControlPlane,
    /// Only nodes carrying the worker role marker
    Worker,
}

/// Declarative description of one add-on as published in a catalog
///
/// Immutable once parsed; a newer catalog supersedes the record wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Stable key identifying the add-on across catalogs
    pub name: String,
    /// Full `major.minor.patch` semantic version; validated at parse time
    pub version: String,
    /// Opaque variant id; catalogs may publish per-release variants
    #[serde(default)]
    pub id: String,
    /// Space-separated conjunction of semver comparator clauses,
    /// e.g. `">=1.4.0 <1.6.0"`; empty matches every cluster version
    #[serde(default)]
    pub kubernetes_version: String,
    /// Whether a first-time install must bootstrap a per-add-on CA and issuer
    #[serde(default, rename = "needsPKI")]
    pub needs_pki: bool,
    /// Rolling-update scope applied when an upgrade lands
    #[serde(default)]
    pub needs_rolling_update: RollingUpdateScope,
    /// Hash of the rendered manifest; empty means unknown
    #[serde(default)]
    pub manifest_hash: String,
    /// Labels every applied object must carry; conflicts are fatal at remap
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// Location of the rendered manifest, relative to the channel
    #[serde(default)]
    pub manifest: Option<String>,
}

impl AddonSpec {
    /// Parsed semantic version of this record
    pub fn semver(&self) -> Result<Version> {
        parse_addon_version(&self.name, &self.version)
    }

    /// Versioned identity of this record (version + variant id + hash)
    pub fn addon_version(&self) -> Result<AddonVersion> {
        Ok(AddonVersion {
            version: self.semver()?,
            variant: self.id.clone(),
            manifest_hash: self.manifest_hash.clone(),
        })
    }

    /// Whether this record applies to the given cluster version.
    ///
    /// A constraint that fails to parse is surfaced via `warn!` and treated
    /// as not matching; it never selects an add-on.
    pub fn matches(&self, cluster_version: &Version) -> bool {
        match version_matches(&self.kubernetes_version, cluster_version) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(addon = %self.name, error = %e, "unparseable kubernetesVersion constraint");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CatalogMetadata {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CatalogSpecDoc {
    #[serde(default)]
    addons: Vec<AddonSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    metadata: CatalogMetadata,
    #[serde(default)]
    spec: CatalogSpecDoc,
}

/// A parsed catalog together with its channel provenance
#[derive(Debug, Clone)]
pub struct CatalogSource {
    /// Channel name the catalog was published under
    pub channel: String,
    /// Location the raw document was fetched from
    pub location: String,
    addons: Vec<AddonSpec>,
}

impl CatalogSource {
    /// Parse a raw catalog document.
    ///
    /// Every record's version string is validated as a full semantic version;
    /// one bad record aborts the whole parse with an error naming the add-on
    /// and the raw version string.
    pub fn parse(channel: &str, location: &str, raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::catalog(channel, format!("document is not UTF-8: {e}")))?;
        let doc = crate::yaml::parse_yaml(text)
            .map_err(|e| Error::catalog(channel, e.to_string()))?;
        let document: CatalogDocument = serde_json::from_value(doc)
            .map_err(|e| Error::catalog(channel, e.to_string()))?;

        for spec in &document.spec.addons {
            parse_addon_version(&spec.name, &spec.version)?;
        }

        if let Some(name) = &document.metadata.name {
            tracing::debug!(catalog = %name, channel, addons = document.spec.addons.len(), "parsed addon catalog");
        }

        Ok(Self {
            channel: channel.to_string(),
            location: location.to_string(),
            addons: document.spec.addons,
        })
    }

    /// All records in the catalog, in document order
    pub fn addons(&self) -> &[AddonSpec] {
        &self.addons
    }

    /// Select the current add-ons for a cluster version.
    ///
    /// Filters records by their Kubernetes version constraint, then picks one
    /// winner per name using the replacement rule (variant id and manifest
    /// hash are consulted here, unlike the coarser cross-catalog merge).
    pub fn current(&self, cluster_version: &Version) -> Result<AddonMenu> {
        let mut menu = AddonMenu::new();
        for spec in &self.addons {
            if !spec.matches(cluster_version) {
                continue;
            }
            let candidate = Addon {
                name: spec.name.clone(),
                channel: self.channel.clone(),
                channel_location: self.location.clone(),
                spec: spec.clone(),
            };
            match menu.addons.get(&spec.name) {
                None => {
                    menu.addons.insert(spec.name.clone(), candidate);
                }
                Some(existing) => {
                    if candidate
                        .spec
                        .addon_version()?
                        .replaces(&existing.spec.addon_version()?)
                    {
                        menu.addons.insert(spec.name.clone(), candidate);
                    }
                }
            }
        }
        Ok(menu)
    }
}
