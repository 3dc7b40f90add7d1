//! Per-add-on PKI bootstrap
//!
//! An add-on that declares `needsPKI` gets a certificate authority secret
//! `<addon>-ca` and a cert-manager issuer `<addon>` in the system namespace,
//! created the first time it is installed. Multiple control-plane nodes may
//! race to bootstrap the same add-on, so every creation is create-if-absent:
//! "already exists" is success, never an error. No distributed lock is used;
//! the API server's create atomicity is the correctness mechanism.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, GroupVersionKind, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tracing::debug;

use crate::{Error, Result, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SYSTEM_NAMESPACE};

#[cfg(test)]
use mockall::automock;

/// Validity period for add-on certificate authorities (10 years)
const CA_VALIDITY_YEARS: i64 = 10;

/// Name of the CA secret for an add-on
pub fn ca_secret_name(addon_name: &str) -> String {
    format!("{addon_name}-ca")
}

/// PEM-encoded CA certificate and key for one add-on
#[derive(Debug, Clone)]
pub struct CaMaterial {
    /// Self-signed CA certificate
    pub cert_pem: String,
    /// CA private key
    pub key_pem: String,
}

/// Outcome of a create-if-absent operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The resource was created by this caller
    Created,
    /// Another caller created it first; treated as success
    AlreadyExists,
}

/// Create-if-absent access to CA secrets and certificate issuers
///
/// Mocked in tests; the real implementation maps Kubernetes 409 conflicts
/// to [`CreateOutcome::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Create the CA secret for an add-on unless it already exists
    async fn create_ca_secret(
        &self,
        addon_name: &str,
        material: &CaMaterial,
    ) -> Result<CreateOutcome>;

    /// Create the issuer for an add-on unless it already exists
    async fn create_issuer(&self, addon_name: &str) -> Result<CreateOutcome>;
}

/// Mint a self-signed certificate authority for one add-on
pub fn generate_ca(addon_name: &str) -> Result<CaMaterial> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(addon_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("Trellis".to_string()),
    );
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + ::time::Duration::days(CA_VALIDITY_YEARS * 365);

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::pki(addon_name, format!("failed to generate CA key: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::pki(addon_name, format!("failed to create CA cert: {e}")))?;

    Ok(CaMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Idempotently provision the CA secret and issuer for an add-on.
///
/// Safe to invoke concurrently from multiple control-plane nodes: whichever
/// caller loses the creation race still succeeds.
pub async fn install_pki(addon_name: &str, store: &dyn CertificateStore) -> Result<()> {
    let material = generate_ca(addon_name)?;

    match store.create_ca_secret(addon_name, &material).await? {
        CreateOutcome::Created => {
            debug!(addon = %addon_name, "created addon CA secret");
        }
        CreateOutcome::AlreadyExists => {
            debug!(addon = %addon_name, "addon CA secret already present");
        }
    }

    match store.create_issuer(addon_name).await? {
        CreateOutcome::Created => {
            debug!(addon = %addon_name, "created addon issuer");
        }
        CreateOutcome::AlreadyExists => {
            debug!(addon = %addon_name, "addon issuer already present");
        }
    }

    Ok(())
}

/// Real certificate store on the Kubernetes and cert-manager APIs
pub struct KubeCertificateStore {
    client: Client,
}

impl KubeCertificateStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CertificateStore for KubeCertificateStore {
    async fn create_ca_secret(
        &self,
        addon_name: &str,
        material: &CaMaterial,
    ) -> Result<CreateOutcome> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(ca_secret_name(addon_name)),
                namespace: Some(SYSTEM_NAMESPACE.to_string()),
                labels: Some(
                    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())].into(),
                ),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            string_data: Some(
                [
                    ("tls.crt".to_string(), material.cert_pem.clone()),
                    ("tls.key".to_string(), material.key_pem.clone()),
                ]
                .into(),
            ),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_issuer(&self, addon_name: &str) -> Result<CreateOutcome> {
        let gvk = GroupVersionKind::gvk("cert-manager.io", "v1", "Issuer");
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), SYSTEM_NAMESPACE, &resource);

        let mut issuer = DynamicObject::new(addon_name, &resource).within(SYSTEM_NAMESPACE);
        issuer.data = serde_json::json!({
            "spec": {
                "ca": { "secretName": ca_secret_name(addon_name) }
            }
        });

        match api.create(&PostParams::default(), &issuer).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}
