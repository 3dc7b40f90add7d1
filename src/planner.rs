//! Update planning: install, upgrade, or nothing
//!
//! Compares an add-on's declared spec against the persisted installed state
//! and decides what, if anything, has to happen. Variant id is not tracked
//! across persisted state, so the replacement comparison here runs on version
//! and manifest content only.

use tracing::{debug, warn};

use crate::catalog::RollingUpdateScope;
use crate::menu::Addon;
use crate::state::ClusterState;
use crate::version::AddonVersion;
use crate::Result;

/// The planner's verdict for one add-on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredUpdate {
    /// Identity currently installed; `None` signals a fresh install
    pub existing: Option<AddonVersion>,
    /// Identity that should be installed
    pub new_version: AddonVersion,
    /// Whether a one-time PKI bootstrap is needed (fresh installs only)
    pub install_pki: bool,
    /// Rolling-update scope declared by the spec
    pub scope: RollingUpdateScope,
}

impl RequiredUpdate {
    /// Whether this is a first-time install rather than an upgrade
    pub fn is_fresh_install(&self) -> bool {
        self.existing.is_none()
    }
}

/// Compute whether an add-on requires an install or upgrade.
///
/// Returns `None` when the installed state already matches the spec. A fresh
/// install carries the spec's PKI requirement; upgrades never re-bootstrap
/// PKI. Fresh installs never mark existing nodes for restart, so the
/// coordinator checks [`RequiredUpdate::is_fresh_install`].
pub async fn required_update(
    addon: &Addon,
    state: &dyn ClusterState,
) -> Result<Option<RequiredUpdate>> {
    let spec = &addon.spec;
    let installed = state.get_installed(&addon.name).await?;

    let Some(installed) = installed else {
        debug!(addon = %addon.name, version = %spec.version, "no installed state, fresh install");
        return Ok(Some(RequiredUpdate {
            existing: None,
            new_version: spec.addon_version()?,
            install_pki: spec.needs_pki,
            scope: spec.needs_rolling_update,
        }));
    };

    let installed_version = match semver::Version::parse(&installed.version) {
        Ok(v) => v,
        Err(e) => {
            // A version we cannot compare against is treated like a fresh
            // install; the next successful apply rewrites the annotation.
            warn!(addon = %addon.name, version = %installed.version, error = %e,
                "unparseable installed version, reinstalling");
            return Ok(Some(RequiredUpdate {
                existing: None,
                new_version: spec.addon_version()?,
                install_pki: spec.needs_pki,
                scope: spec.needs_rolling_update,
            }));
        }
    };

    // Variant id is not tracked across persisted state; compare on version
    // and manifest content only.
    let old = AddonVersion {
        version: installed_version,
        variant: String::new(),
        manifest_hash: installed.manifest_hash.clone(),
    };
    let new = AddonVersion {
        version: spec.semver()?,
        variant: String::new(),
        manifest_hash: spec.manifest_hash.clone(),
    };

    if !new.replaces(&old) {
        debug!(addon = %addon.name, installed = %old, "addon is current");
        return Ok(None);
    }

    debug!(addon = %addon.name, installed = %old, new = %new, "addon requires update");
    Ok(Some(RequiredUpdate {
        existing: Some(old),
        new_version: new,
        install_pki: false,
        scope: spec.needs_rolling_update,
    }))
}
