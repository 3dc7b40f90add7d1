//! The menu of winning add-ons, merged across catalogs
//!
//! Independent channels may each publish a record for the same add-on name.
//! The menu keeps at most one [`Addon`] per name; merging resolves collisions
//! by semantic version alone ("newest wins" across sources), deliberately
//! coarser than the single-source replacement rule, which also consults
//! variant id and manifest hash.

use std::collections::BTreeMap;

use crate::catalog::AddonSpec;
use crate::Result;

/// A selected add-on together with its catalog provenance
///
/// Never mutated; replaced wholesale on re-merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Addon {
    /// Stable add-on name, the menu key
    pub name: String,
    /// Channel the winning record came from
    pub channel: String,
    /// Location of the channel document
    pub channel_location: String,
    /// The winning catalog record
    pub spec: AddonSpec,
}

/// Name-keyed table of winning add-ons
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddonMenu {
    /// At most one occupant per name, determined by the merge rule
    pub addons: BTreeMap<String, Addon>,
}

impl AddonMenu {
    /// Create an empty menu
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another menu into this one.
    ///
    /// Absent names are inserted. For collisions the occupant with the higher
    /// semantic version wins; ties keep the existing occupant, which makes
    /// the operation idempotent. Variant id and manifest hash are not
    /// consulted here.
    pub fn merge(&mut self, other: AddonMenu) -> Result<()> {
        for (name, candidate) in other.addons {
            match self.addons.get(&name) {
                None => {
                    self.addons.insert(name, candidate);
                }
                Some(existing) => {
                    if candidate.spec.semver()? > existing.spec.semver()? {
                        self.addons.insert(name, candidate);
                    }
                }
            }
        }
        Ok(())
    }
}
