//! Manifest remapping: cluster identity injection before apply
//!
//! A rendered add-on manifest is third-party content. Before it is applied,
//! every object gets the standard management labels, known service accounts
//! get least-privilege credential bindings, a few well-known add-ons get
//! structural rewrites, and image/asset references are rewritten through the
//! external asset remapper.

use k8s_openapi::api::core::v1::PodSpec;
use serde_json::Value;
use tracing::warn;

use crate::iam::{attach_credentials, well_known_service_account};
use crate::menu::Addon;
use crate::{
    Error, Result, ADDON_NAME_LABEL, ADDON_VERSION_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};

#[cfg(test)]
use mockall::automock;

/// Cluster identity injected into remapped manifests
#[derive(Debug, Clone)]
pub struct ClusterContext {
    /// Fully qualified cluster name
    pub cluster_name: String,
    /// AWS account the cluster's IAM roles live in
    pub aws_account_id: String,
    /// AWS partition, usually `aws`
    pub aws_partition: String,
}

/// External asset remapper rewriting image/blob references to their
/// mirrored or pinned locations
#[cfg_attr(test, automock)]
pub trait AssetRemapper: Send + Sync {
    /// Rewrite asset references in a serialized manifest
    fn remap_manifest(&self, manifest: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Transform a rendered add-on manifest for this cluster.
///
/// Parses the manifest into objects, applies the add-on's structural rewrite
/// if one is registered, injects labels and credentials, serializes the
/// objects back, and finally runs the asset remapper. Asset remap failures
/// are fatal and carry the manifest content for diagnostics.
pub fn remap_addon_manifest(
    addon: &Addon,
    cluster: &ClusterContext,
    assets: &dyn AssetRemapper,
    manifest: &[u8],
) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(manifest)
        .map_err(|e| Error::remap(&addon.name, format!("manifest is not UTF-8: {e}")))?;
    let mut objects: Vec<Value> = crate::yaml::parse_yaml_multi(text)
        .map_err(|e| Error::remap(&addon.name, e.to_string()))?
        .into_iter()
        .filter(|object| !object.is_null())
        .collect();

    if let Some(rewrite) = well_known_rewrite(&addon.name) {
        rewrite(cluster, &mut objects)?;
    }

    add_labels(addon, &mut objects)?;
    add_service_account_role(addon, cluster, &mut objects)?;

    let serialized = crate::yaml::to_yaml_multi(&objects)
        .map_err(|e| Error::serialization(e.to_string()))?;

    match assets.remap_manifest(serialized.as_bytes()) {
        Ok(remapped) => Ok(remapped),
        Err(e) => {
            warn!(addon = %addon.name, "invalid manifest: {serialized}");
            Err(Error::asset_remap(e, serialized))
        }
    }
}

/// Structural rewrites registered for well-known add-on names
fn well_known_rewrite(
    addon_name: &str,
) -> Option<fn(&ClusterContext, &mut [Value]) -> Result<()>> {
    match addon_name {
        "dns-controller.addons.k8s.io" => Some(dns_controller_rewrite),
        _ => None,
    }
}

/// Inject the cluster identity into the dns-controller Deployment.
///
/// The controller discovers records to manage by cluster name, which only
/// the installer knows at render time.
fn dns_controller_rewrite(cluster: &ClusterContext, objects: &mut [Value]) -> Result<()> {
    for object in objects.iter_mut() {
        if !is_apps_v1_deployment(object) {
            continue;
        }
        let mut pod_spec = parse_pod_spec(object)?;
        for container in &mut pod_spec.containers {
            let env = container.env.get_or_insert_with(Vec::new);
            if !env.iter().any(|e| e.name == "CLUSTER_NAME") {
                env.push(k8s_openapi::api::core::v1::EnvVar {
                    name: "CLUSTER_NAME".to_string(),
                    value: Some(cluster.cluster_name.clone()),
                    ..Default::default()
                });
            }
        }
        write_pod_spec(object, &pod_spec)?;
    }
    Ok(())
}

/// Ensure every object carries the management and selector labels.
///
/// A selector label already present with a different value is a conflict and
/// fails the remap; labels are never silently overwritten.
fn add_labels(addon: &Addon, objects: &mut [Value]) -> Result<()> {
    for object in objects.iter_mut() {
        let labels = labels_mut(addon, object)?;

        labels.insert(
            MANAGED_BY_LABEL.to_string(),
            Value::String(MANAGED_BY_VALUE.to_string()),
        );
        labels.insert(
            ADDON_NAME_LABEL.to_string(),
            Value::String(addon.name.clone()),
        );
        labels.insert(
            ADDON_VERSION_LABEL.to_string(),
            Value::String(addon.spec.version.clone()),
        );

        for (key, value) in &addon.spec.selector {
            if let Some(existing) = labels.get(key) {
                let existing = existing.as_str().unwrap_or_default();
                if existing != value {
                    return Err(Error::label_conflict(key, value, existing));
                }
            }
            labels.insert(key.clone(), Value::String(value.clone()));
        }
    }
    Ok(())
}

/// Attach least-privilege credentials to Deployments running a well-known
/// service account. Unknown account names are left untouched.
fn add_service_account_role(
    addon: &Addon,
    cluster: &ClusterContext,
    objects: &mut [Value],
) -> Result<()> {
    for object in objects.iter_mut() {
        if !is_apps_v1_deployment(object) {
            continue;
        }

        let mut pod_spec = parse_pod_spec(object).map_err(|e| {
            Error::remap(&addon.name, format!("failed to add service account role: {e}"))
        })?;

        let Some(subject) = pod_spec
            .service_account_name
            .as_deref()
            .and_then(well_known_service_account)
        else {
            continue;
        };

        attach_credentials(&mut pod_spec, subject, cluster);
        write_pod_spec(object, &pod_spec)?;
    }
    Ok(())
}

fn is_apps_v1_deployment(object: &Value) -> bool {
    object.get("kind").and_then(Value::as_str) == Some("Deployment")
        && object.get("apiVersion").and_then(Value::as_str) == Some("apps/v1")
}

fn parse_pod_spec(object: &Value) -> Result<PodSpec> {
    let value = object
        .pointer("/spec/template/spec")
        .cloned()
        .ok_or_else(|| {
            Error::serialization("Deployment has no spec.template.spec".to_string())
        })?;
    serde_json::from_value(value).map_err(|e| {
        Error::serialization(format!("failed to parse spec.template.spec from Deployment: {e}"))
    })
}

fn write_pod_spec(object: &mut Value, pod_spec: &PodSpec) -> Result<()> {
    let value = serde_json::to_value(pod_spec)
        .map_err(|e| Error::serialization(e.to_string()))?;
    let slot = object
        .pointer_mut("/spec/template/spec")
        .ok_or_else(|| Error::serialization("Deployment has no spec.template.spec".to_string()))?;
    *slot = value;
    Ok(())
}

fn labels_mut<'a>(
    addon: &Addon,
    object: &'a mut Value,
) -> Result<&'a mut serde_json::Map<String, Value>> {
    let root = object
        .as_object_mut()
        .ok_or_else(|| Error::remap(&addon.name, "manifest document is not an object"))?;
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
        .ok_or_else(|| Error::remap(&addon.name, "metadata is not an object"))?;
    metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(Default::default()))
        .as_object_mut()
        .ok_or_else(|| Error::remap(&addon.name, "metadata.labels is not an object"))
}
