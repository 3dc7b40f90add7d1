//! Rolling-update coordination
//!
//! After an add-on upgrade, nodes in the declared scope are annotated
//! `kops.k8s.io/needs-update` so the rolling-update machinery restarts them.
//! Marking is per-node and independent: one failed write never blocks the
//! others, and failed nodes are picked up again on the next reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::catalog::RollingUpdateScope;
use crate::planner::RequiredUpdate;
use crate::{Result, FIELD_MANAGER, NEEDS_UPDATE_ANNOTATION};

#[cfg(test)]
use mockall::automock;

/// Label keys marking the control-plane role on a node
const CONTROL_PLANE_ROLE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Label key marking the worker role on a node
const WORKER_ROLE_LABEL: &str = "node-role.kubernetes.io/node";

/// The slice of a node's state the coordinator needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node object name
    pub name: String,
    /// Node labels, used for role matching
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    /// Whether the node carries a control-plane role marker
    pub fn is_control_plane(&self) -> bool {
        CONTROL_PLANE_ROLE_LABELS
            .iter()
            .any(|key| self.labels.contains_key(*key))
    }

    /// Whether the node carries the worker role marker
    pub fn is_worker(&self) -> bool {
        self.labels.contains_key(WORKER_ROLE_LABEL)
    }

    fn in_scope(&self, scope: RollingUpdateScope) -> bool {
        match scope {
            RollingUpdateScope::None => false,
            RollingUpdateScope::All => true,
            RollingUpdateScope::ControlPlane => self.is_control_plane(),
            RollingUpdateScope::Worker => self.is_worker(),
        }
    }
}

/// Node enumeration and restart marking
///
/// Mocked in tests; the real implementation talks to the Node API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeState: Send + Sync {
    /// List every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Annotate one node as needing a rolling restart
    async fn mark_needs_update(&self, node_name: &str) -> Result<()>;
}

/// Outcome of one marking pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkSummary {
    /// Nodes successfully annotated
    pub marked: usize,
    /// Nodes whose annotation write failed; retried next cycle
    pub failed: Vec<String>,
}

/// Mark the nodes affected by an upgrade as needing a restart.
///
/// A fresh install is a no-op: new nodes receive the add-on at provisioning
/// time, so only actual upgrades restart existing nodes. Per-node write
/// failures are logged and reported in the summary, never fatal.
pub async fn mark_nodes_for_restart(
    update: &RequiredUpdate,
    nodes: &dyn NodeState,
) -> Result<MarkSummary> {
    if update.is_fresh_install() || update.scope == RollingUpdateScope::None {
        return Ok(MarkSummary::default());
    }

    let mut summary = MarkSummary::default();
    for node in nodes.list_nodes().await? {
        if !node.in_scope(update.scope) {
            continue;
        }
        match nodes.mark_needs_update(&node.name).await {
            Ok(()) => {
                debug!(node = %node.name, "marked node for rolling update");
                summary.marked += 1;
            }
            Err(e) => {
                warn!(node = %node.name, error = %e, "failed to mark node for rolling update");
                summary.failed.push(node.name);
            }
        }
    }
    Ok(summary)
}

/// Real node accessor on the Kubernetes Node API
pub struct KubeNodeState {
    client: Client,
}

impl KubeNodeState {
    /// Create a node accessor wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeState for KubeNodeState {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes
            .items
            .into_iter()
            .map(|node| NodeInfo {
                name: node.name_any(),
                labels: node.metadata.labels.clone().unwrap_or_default(),
            })
            .collect())
    }

    async fn mark_needs_update(&self, node_name: &str) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": {
                "annotations": { NEEDS_UPDATE_ANNOTATION: "needed" }
            }
        });
        api.patch(
            node_name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::AddonVersion;
    use crate::Error;
    use semver::Version;

    fn node(name: &str, role_label: &str) -> NodeInfo {
        let mut labels = BTreeMap::new();
        if !role_label.is_empty() {
            labels.insert(role_label.to_string(), String::new());
        }
        NodeInfo {
            name: name.to_string(),
            labels,
        }
    }

    fn cluster_nodes() -> Vec<NodeInfo> {
        vec![
            node("cp", "node-role.kubernetes.io/master"),
            node("node", "node-role.kubernetes.io/node"),
        ]
    }

    fn upgrade(scope: RollingUpdateScope) -> RequiredUpdate {
        RequiredUpdate {
            existing: Some(AddonVersion::new(Version::new(1, 0, 0))),
            new_version: AddonVersion::new(Version::new(1, 0, 1)),
            install_pki: false,
            scope,
        }
    }

    fn fresh_install(scope: RollingUpdateScope) -> RequiredUpdate {
        RequiredUpdate {
            existing: None,
            new_version: AddonVersion::new(Version::new(1, 0, 0)),
            install_pki: false,
            scope,
        }
    }

    fn nodes_expecting_marks(marks: usize) -> MockNodeState {
        let mut nodes = MockNodeState::new();
        nodes.expect_list_nodes().returning(|| Ok(cluster_nodes()));
        nodes
            .expect_mark_needs_update()
            .times(marks)
            .returning(|_| Ok(()));
        nodes
    }

    #[tokio::test]
    async fn test_scope_all_marks_every_node() {
        let nodes = nodes_expecting_marks(2);
        let summary = mark_nodes_for_restart(&upgrade(RollingUpdateScope::All), &nodes)
            .await
            .unwrap();
        assert_eq!(summary.marked, 2);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn test_scope_control_plane_marks_only_control_plane() {
        let mut nodes = MockNodeState::new();
        nodes.expect_list_nodes().returning(|| Ok(cluster_nodes()));
        nodes
            .expect_mark_needs_update()
            .withf(|name| name == "cp")
            .times(1)
            .returning(|_| Ok(()));

        let summary = mark_nodes_for_restart(&upgrade(RollingUpdateScope::ControlPlane), &nodes)
            .await
            .unwrap();
        assert_eq!(summary.marked, 1);
    }

    #[tokio::test]
    async fn test_scope_worker_marks_only_workers() {
        let mut nodes = MockNodeState::new();
        nodes.expect_list_nodes().returning(|| Ok(cluster_nodes()));
        nodes
            .expect_mark_needs_update()
            .withf(|name| name == "node")
            .times(1)
            .returning(|_| Ok(()));

        let summary = mark_nodes_for_restart(&upgrade(RollingUpdateScope::Worker), &nodes)
            .await
            .unwrap();
        assert_eq!(summary.marked, 1);
    }

    #[tokio::test]
    async fn test_fresh_install_marks_no_nodes() {
        // No list or mark calls expected at all
        let nodes = MockNodeState::new();
        let summary = mark_nodes_for_restart(&fresh_install(RollingUpdateScope::All), &nodes)
            .await
            .unwrap();
        assert_eq!(summary, MarkSummary::default());
    }

    #[tokio::test]
    async fn test_scope_none_marks_no_nodes() {
        let nodes = MockNodeState::new();
        let summary = mark_nodes_for_restart(&upgrade(RollingUpdateScope::None), &nodes)
            .await
            .unwrap();
        assert_eq!(summary.marked, 0);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_block_other_nodes() {
        let mut nodes = MockNodeState::new();
        nodes.expect_list_nodes().returning(|| Ok(cluster_nodes()));
        nodes.expect_mark_needs_update().returning(|name| {
            if name == "cp" {
                Err(Error::serialization("simulated write failure"))
            } else {
                Ok(())
            }
        });

        let summary = mark_nodes_for_restart(&upgrade(RollingUpdateScope::All), &nodes)
            .await
            .unwrap();
        assert_eq!(summary.marked, 1);
        assert_eq!(summary.failed, vec!["cp".to_string()]);
    }

    #[test]
    fn test_control_plane_role_matches_both_label_forms() {
        assert!(node("a", "node-role.kubernetes.io/control-plane").is_control_plane());
        assert!(node("b", "node-role.kubernetes.io/master").is_control_plane());
        assert!(!node("c", "node-role.kubernetes.io/node").is_control_plane());
        assert!(node("c", "node-role.kubernetes.io/node").is_worker());
    }
}
