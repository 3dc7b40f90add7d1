//! Add-on apply pipeline
//!
//! Drives one add-on from plan to persisted state: decide whether anything is
//! needed, bootstrap PKI on first install, remap the manifest for this
//! cluster, hand it to the apply engine, mark nodes after upgrades, and only
//! then record the new installed state. Recording last means a failed apply
//! is retried from scratch on the next cycle.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::menu::Addon;
use crate::pki::{install_pki, CertificateStore};
use crate::planner::required_update;
use crate::remap::{remap_addon_manifest, AssetRemapper, ClusterContext};
use crate::rolling::{mark_nodes_for_restart, NodeState};
use crate::state::{ClusterState, InstalledState};
use crate::Result;

#[cfg(test)]
use mockall::automock;

/// The external apply engine that lands objects on the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Apply a remapped manifest to the cluster
    async fn apply(&self, addon_name: &str, manifest: &[u8]) -> Result<()>;
}

/// The collaborators one apply pass needs
pub struct AddonInstaller<'a> {
    /// Persisted installed-state store
    pub state: &'a dyn ClusterState,
    /// Node enumeration and restart marking
    pub nodes: &'a dyn NodeState,
    /// CA secret and issuer store
    pub certificates: &'a dyn CertificateStore,
    /// External asset remapper
    pub assets: &'a dyn AssetRemapper,
    /// External apply engine
    pub applier: &'a dyn ManifestApplier,
}

impl AddonInstaller<'_> {
    /// Bring one add-on up to date.
    ///
    /// Returns `true` when a manifest was applied, `false` when the installed
    /// state already matched. Installed state is recorded only after the
    /// apply and node marking succeed.
    pub async fn ensure_addon(
        &self,
        addon: &Addon,
        cluster: &ClusterContext,
        manifest: &[u8],
    ) -> Result<bool> {
        let Some(update) = required_update(addon, self.state).await? else {
            debug!(addon = %addon.name, "no update required");
            return Ok(false);
        };

        if update.install_pki {
            install_pki(&addon.name, self.certificates).await?;
        }

        let remapped = remap_addon_manifest(addon, cluster, self.assets, manifest)?;
        self.applier.apply(&addon.name, &remapped).await?;

        let summary = mark_nodes_for_restart(&update, self.nodes).await?;
        if !summary.failed.is_empty() {
            warn!(addon = %addon.name, failed = summary.failed.len(),
                "some nodes could not be marked for rolling update");
        }

        let installed = InstalledState {
            version: update.new_version.version.to_string(),
            manifest_hash: update.new_version.manifest_hash.clone(),
        };
        self.state.record_installed(&addon.name, &installed).await?;

        info!(addon = %addon.name, version = %installed.version,
            fresh_install = update.is_fresh_install(), "applied addon");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AddonSpec, RollingUpdateScope};
    use crate::pki::{CreateOutcome, MockCertificateStore};
    use crate::remap::MockAssetRemapper;
    use crate::rolling::MockNodeState;
    use crate::state::MockClusterState;
    use std::collections::BTreeMap;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: test
  namespace: kube-system
"#;

    fn addon(version: &str, needs_pki: bool, scope: RollingUpdateScope) -> Addon {
        Addon {
            name: "test.addons.k8s.io".to_string(),
            channel: "stable".to_string(),
            channel_location: "memory://x".to_string(),
            spec: AddonSpec {
                name: "test.addons.k8s.io".to_string(),
                version: version.to_string(),
                manifest_hash: "abc".to_string(),
                needs_pki,
                needs_rolling_update: scope,
                selector: BTreeMap::new(),
                ..Default::default()
            },
        }
    }

    fn cluster() -> ClusterContext {
        ClusterContext {
            cluster_name: "demo.example.com".to_string(),
            aws_account_id: "123456789012".to_string(),
            aws_partition: "aws".to_string(),
        }
    }

    fn passthrough_assets() -> MockAssetRemapper {
        let mut assets = MockAssetRemapper::new();
        assets
            .expect_remap_manifest()
            .returning(|manifest| Ok(manifest.to_vec()));
        assets
    }

    #[tokio::test]
    async fn test_current_addon_is_a_no_op() {
        let mut state = MockClusterState::new();
        state.expect_get_installed().returning(|_| {
            Ok(Some(InstalledState {
                version: "1.0.0".to_string(),
                manifest_hash: "abc".to_string(),
            }))
        });
        state.expect_record_installed().times(0);

        let nodes = MockNodeState::new();
        let certificates = MockCertificateStore::new();
        let assets = MockAssetRemapper::new();
        let mut applier = MockManifestApplier::new();
        applier.expect_apply().times(0);

        let installer = AddonInstaller {
            state: &state,
            nodes: &nodes,
            certificates: &certificates,
            assets: &assets,
            applier: &applier,
        };

        let changed = installer
            .ensure_addon(
                &addon("1.0.0", false, RollingUpdateScope::All),
                &cluster(),
                MANIFEST.as_bytes(),
            )
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_fresh_install_bootstraps_pki_and_skips_node_marking() {
        let mut state = MockClusterState::new();
        state.expect_get_installed().returning(|_| Ok(None));
        state
            .expect_record_installed()
            .withf(|name, installed| {
                name == "test.addons.k8s.io"
                    && installed.version == "1.0.0"
                    && installed.manifest_hash == "abc"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        // Fresh install: no node listing or marking at all
        let nodes = MockNodeState::new();

        let mut certificates = MockCertificateStore::new();
        certificates
            .expect_create_ca_secret()
            .times(1)
            .returning(|_, _| Ok(CreateOutcome::Created));
        certificates
            .expect_create_issuer()
            .times(1)
            .returning(|_| Ok(CreateOutcome::Created));

        let assets = passthrough_assets();
        let mut applier = MockManifestApplier::new();
        applier.expect_apply().times(1).returning(|_, _| Ok(()));

        let installer = AddonInstaller {
            state: &state,
            nodes: &nodes,
            certificates: &certificates,
            assets: &assets,
            applier: &applier,
        };

        let changed = installer
            .ensure_addon(
                &addon("1.0.0", true, RollingUpdateScope::All),
                &cluster(),
                MANIFEST.as_bytes(),
            )
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_upgrade_marks_nodes_without_pki() {
        let mut state = MockClusterState::new();
        state.expect_get_installed().returning(|_| {
            Ok(Some(InstalledState {
                version: "1.0.0".to_string(),
                manifest_hash: "old".to_string(),
            }))
        });
        state
            .expect_record_installed()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut nodes = MockNodeState::new();
        nodes.expect_list_nodes().times(1).returning(|| Ok(vec![]));

        // needsPKI is declared but upgrades never re-bootstrap
        let certificates = MockCertificateStore::new();

        let assets = passthrough_assets();
        let mut applier = MockManifestApplier::new();
        applier.expect_apply().times(1).returning(|_, _| Ok(()));

        let installer = AddonInstaller {
            state: &state,
            nodes: &nodes,
            certificates: &certificates,
            assets: &assets,
            applier: &applier,
        };

        let changed = installer
            .ensure_addon(
                &addon("2.0.0", true, RollingUpdateScope::All),
                &cluster(),
                MANIFEST.as_bytes(),
            )
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_state_unrecorded() {
        let mut state = MockClusterState::new();
        state.expect_get_installed().returning(|_| Ok(None));
        state.expect_record_installed().times(0);

        let nodes = MockNodeState::new();
        let certificates = MockCertificateStore::new();
        let assets = passthrough_assets();

        let mut applier = MockManifestApplier::new();
        applier
            .expect_apply()
            .returning(|_, _| Err(crate::Error::serialization("apply engine unavailable")));

        let installer = AddonInstaller {
            state: &state,
            nodes: &nodes,
            certificates: &certificates,
            assets: &assets,
            applier: &applier,
        };

        let result = installer
            .ensure_addon(
                &addon("1.0.0", false, RollingUpdateScope::None),
                &cluster(),
                MANIFEST.as_bytes(),
            )
            .await;
        assert!(result.is_err());
    }
}
