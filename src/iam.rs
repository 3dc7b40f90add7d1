//! Least-privilege credential bindings for well-known service accounts
//!
//! A small, fixed set of add-on service accounts is entitled to a dedicated
//! IAM role. The registry is a closed match on the account name; anything
//! unknown is left untouched. Matching Deployments get web-identity
//! credentials projected into every container: the role ARN and a
//! service-account token volume with the AWS audience.

use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, ProjectedVolumeSource, ServiceAccountTokenProjection, Volume,
    VolumeMount, VolumeProjection,
};

use crate::remap::ClusterContext;

/// Token audience accepted by the cluster's OIDC identity provider
const AUDIENCE: &str = "amazonaws.com";

/// Directory the projected token is mounted under
const TOKEN_MOUNT_DIR: &str = "/var/run/secrets/amazonaws.com/";

/// Volume name for the projected service-account token
const TOKEN_VOLUME_NAME: &str = "token-amazonaws-com";

/// A service account entitled to a dedicated least-privilege role
///
/// The set of known accounts is fixed and small, so this is a closed enum,
/// not dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAccountSubject {
    /// The AWS load balancer controller add-on
    AwsLoadBalancerController,
}

impl ServiceAccountSubject {
    /// The service account name this subject binds to
    pub fn service_account_name(&self) -> &'static str {
        match self {
            Self::AwsLoadBalancerController => "aws-load-balancer-controller",
        }
    }

    /// Namespace the service account lives in
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::AwsLoadBalancerController => crate::SYSTEM_NAMESPACE,
        }
    }

    /// ARN of the role minted for this subject on the given cluster
    pub fn role_arn(&self, cluster: &ClusterContext) -> String {
        format!(
            "arn:{}:iam::{}:role/{}.{}.sa.{}",
            cluster.aws_partition,
            cluster.aws_account_id,
            self.service_account_name(),
            self.namespace(),
            cluster.cluster_name
        )
    }
}

/// Look up the credential subject for a service account name.
///
/// Unknown names return `None` and are not an error.
pub fn well_known_service_account(name: &str) -> Option<ServiceAccountSubject> {
    match name {
        "aws-load-balancer-controller" => Some(ServiceAccountSubject::AwsLoadBalancerController),
        _ => None,
    }
}

/// Attach the subject's credential binding to every container of a pod spec.
///
/// Adds the `AWS_ROLE_ARN` and `AWS_WEB_IDENTITY_TOKEN_FILE` environment
/// variables plus a projected service-account token volume and mount.
/// Idempotent per key: existing entries with the same name are not duplicated.
pub fn attach_credentials(
    pod_spec: &mut PodSpec,
    subject: ServiceAccountSubject,
    cluster: &ClusterContext,
) {
    let role_arn = subject.role_arn(cluster);
    let token_file = format!("{TOKEN_MOUNT_DIR}token");

    for container in &mut pod_spec.containers {
        add_env(container, "AWS_ROLE_ARN", &role_arn);
        add_env(container, "AWS_WEB_IDENTITY_TOKEN_FILE", &token_file);
        add_token_mount(container);
    }

    let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == TOKEN_VOLUME_NAME) {
        volumes.push(Volume {
            name: TOKEN_VOLUME_NAME.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(vec![VolumeProjection {
                    service_account_token: Some(ServiceAccountTokenProjection {
                        audience: Some(AUDIENCE.to_string()),
                        path: "token".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
}

fn add_env(container: &mut Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    if env.iter().any(|e| e.name == name) {
        return;
    }
    env.push(EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    });
}

fn add_token_mount(container: &mut Container) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    if mounts.iter().any(|m| m.name == TOKEN_VOLUME_NAME) {
        return;
    }
    mounts.push(VolumeMount {
        name: TOKEN_VOLUME_NAME.to_string(),
        mount_path: TOKEN_MOUNT_DIR.trim_end_matches('/').to_string(),
        read_only: Some(true),
        ..Default::default()
    });
}
