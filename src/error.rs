//! Error types for the add-on pipeline
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information like the add-on name, the
//! offending version string, or the conflicting label values.

use thiserror::Error;

/// Main error type for add-on operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A catalog record carries a version the semantic-version grammar rejects
    #[error("addon {addon:?} has unparseable version {version:?}: {message}")]
    InvalidVersion {
        /// Name of the add-on with the bad version
        addon: String,
        /// The raw version string as published
        version: String,
        /// Message surfaced verbatim from the semver parser
        message: String,
    },

    /// A Kubernetes version constraint clause failed to parse
    #[error("invalid kubernetes version constraint {constraint:?}: {message}")]
    InvalidConstraint {
        /// The full constraint string from the catalog
        constraint: String,
        /// Message surfaced verbatim from the semver parser
        message: String,
    },

    /// The catalog document itself could not be decoded
    #[error("invalid addon catalog {channel:?}: {message}")]
    Catalog {
        /// Channel the catalog was loaded from
        channel: String,
        /// Description of what failed
        message: String,
    },

    /// An object already carries a label with a different value
    #[error("label {key:?} already set to {actual:?} while it should be {expected:?}")]
    LabelConflict {
        /// The conflicting label key
        key: String,
        /// Value the add-on selector requires
        expected: String,
        /// Value found on the object
        actual: String,
    },

    /// Manifest transformation failed for one add-on
    #[error("failed to remap manifest for {addon:?}: {message}")]
    Remap {
        /// Name of the add-on being remapped
        addon: String,
        /// Description of what failed
        message: String,
    },

    /// The external asset remapper rejected the manifest
    ///
    /// Carries the full manifest content for reproducibility.
    #[error("error remapping manifest assets: {message}")]
    AssetRemap {
        /// Description of what failed
        message: String,
        /// The manifest that was being remapped
        manifest: String,
    },

    /// PKI bootstrap failed for one add-on
    #[error("pki bootstrap error for {addon:?}: {message}")]
    Pki {
        /// Name of the add-on being bootstrapped
        addon: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create an invalid-version error for a catalog record
    pub fn invalid_version(
        addon: impl Into<String>,
        version: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidVersion {
            addon: addon.into(),
            version: version.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-constraint error
    pub fn invalid_constraint(
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidConstraint {
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    /// Create a catalog decode error
    pub fn catalog(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a label conflict error
    pub fn label_conflict(
        key: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::LabelConflict {
            key: key.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a remap error for one add-on
    pub fn remap(addon: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remap {
            addon: addon.into(),
            message: message.into(),
        }
    }

    /// Create an asset-remap error carrying the offending manifest
    pub fn asset_remap(message: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self::AssetRemap {
            message: message.into(),
            manifest: manifest.into(),
        }
    }

    /// Create a PKI bootstrap error
    pub fn pki(addon: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pki {
            addon: addon.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Catalog, version, and label errors require a catalog or manifest fix
    /// and are not retryable. Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors, not on 4xx responses
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::InvalidVersion { .. } => false,
            Error::InvalidConstraint { .. } => false,
            Error::Catalog { .. } => false,
            Error::LabelConflict { .. } => false,
            Error::Remap { .. } => false,
            Error::AssetRemap { .. } => false,
            Error::Pki { .. } => true,
            Error::Serialization { .. } => false,
        }
    }

    /// Get the add-on name if this error is associated with a specific add-on
    pub fn addon(&self) -> Option<&str> {
        match self {
            Error::InvalidVersion { addon, .. } => Some(addon),
            Error::Remap { addon, .. } => Some(addon),
            Error::Pki { addon, .. } => Some(addon),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_version_message_shape() {
        let err = Error::invalid_version("testaddon", "1.0-kops", "unexpected character '-'");
        let msg = err.to_string();
        assert!(msg.starts_with("addon \"testaddon\" has unparseable version \"1.0-kops\":"));
        assert!(msg.contains("unexpected character"));
        assert!(!err.is_retryable());
        assert_eq!(err.addon(), Some("testaddon"));
    }

    #[test]
    fn test_label_conflict_names_key_and_values() {
        let err = Error::label_conflict("k8s-addon", "expected.addons.k8s.io", "other");
        let msg = err.to_string();
        assert!(msg.contains("\"k8s-addon\""));
        assert!(msg.contains("\"expected.addons.k8s.io\""));
        assert!(msg.contains("\"other\""));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_asset_remap_carries_manifest() {
        let err = Error::asset_remap("unknown image", "kind: Deployment");
        match &err {
            Error::AssetRemap { manifest, .. } => assert_eq!(manifest, "kind: Deployment"),
            _ => panic!("expected AssetRemap variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pki_errors_are_retryable() {
        let err = Error::pki("networking", "connection refused");
        assert!(err.is_retryable());
        assert_eq!(err.addon(), Some("networking"));
    }

    #[test]
    fn test_error_construction_accepts_str_and_string() {
        let dynamic = format!("addon {} rejected", "coredns");
        let err = Error::catalog("stable", dynamic);
        assert!(err.to_string().contains("coredns"));

        let err = Error::serialization("static message");
        assert!(err.to_string().contains("static message"));
    }
}
