//! Persisted installed-state access
//!
//! What was last successfully applied for each add-on is recorded as an
//! annotation `addons.k8s.io/<name>` on the system namespace, holding a small
//! JSON object `{"version": "...", "manifestHash": "..."}`. The store is the
//! sole source of truth: every read hits the API and nothing is cached across
//! calls.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Result, FIELD_MANAGER, INSTALLED_STATE_ANNOTATION_PREFIX, SYSTEM_NAMESPACE};

#[cfg(test)]
use mockall::automock;

/// Snapshot of what was last applied for one add-on
///
/// Absent entirely before the first install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledState {
    /// Version that was applied
    pub version: String,
    /// Hash of the manifest that was applied
    pub manifest_hash: String,
}

/// Annotation key recording installed state for the named add-on
pub fn installed_state_annotation(addon_name: &str) -> String {
    format!("{INSTALLED_STATE_ANNOTATION_PREFIX}{addon_name}")
}

/// Read/write access to persisted installed state
///
/// Mocked in tests; the real implementation reads and writes the system
/// namespace through the Kubernetes API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Read the installed state recorded for an add-on.
    ///
    /// Returns `None` when no install has been recorded.
    async fn get_installed(&self, addon_name: &str) -> Result<Option<InstalledState>>;

    /// Record the installed state for an add-on after a successful apply
    async fn record_installed(&self, addon_name: &str, state: &InstalledState) -> Result<()>;
}

/// Real installed-state store on the system namespace annotations
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn get_installed(&self, addon_name: &str) -> Result<Option<InstalledState>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api.get(SYSTEM_NAMESPACE).await?;

        let key = installed_state_annotation(addon_name);
        let value = namespace
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(&key));

        let Some(raw) = value else {
            return Ok(None);
        };

        match serde_json::from_str::<InstalledState>(raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // A corrupt annotation is treated as no existing install; the
                // next successful apply rewrites it.
                warn!(addon = %addon_name, error = %e, "malformed installed-state annotation");
                Ok(None)
            }
        }
    }

    async fn record_installed(&self, addon_name: &str, state: &InstalledState) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let key = installed_state_annotation(addon_name);
        let value = serde_json::to_string(state)
            .map_err(|e| crate::Error::serialization(e.to_string()))?;

        let patch = serde_json::json!({
            "metadata": {
                "annotations": { key: value }
            }
        });
        api.patch(
            SYSTEM_NAMESPACE,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
