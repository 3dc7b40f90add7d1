//! Trellis add-ons - cluster add-on lifecycle management
//!
//! Trellis decides which versioned add-on manifest should be installed on a
//! cluster, detects drift against what is currently running, transforms the
//! manifest with cluster identity before it is applied, and coordinates the
//! rolling restarts and one-time PKI bootstrap an update may require.
//!
//! # Pipeline
//!
//! Catalogs are parsed into add-on specs, merged into a menu of winners, and
//! each winner is reconciled:
//!
//! - [`catalog`] - catalog document parsing and single-source winner selection
//! - [`menu`] - the name-keyed table of winning add-ons, merged across catalogs
//! - [`planner`] - install/upgrade decision against persisted installed state
//! - [`remap`] - manifest transformation (labels, credentials, asset remapping)
//! - [`rolling`] - marking nodes that need a restart after an upgrade
//! - [`pki`] - idempotent per-add-on CA and issuer bootstrap
//! - [`apply`] - the driver tying the stages together for one add-on
//!
//! External state (installed-state annotations, node markers, PKI resources)
//! is reached through accessor traits with real implementations on
//! [`kube::Client`]; tests mock the traits.

#![deny(missing_docs)]

pub mod apply;
pub mod catalog;
pub mod error;
pub mod iam;
pub mod menu;
pub mod pki;
pub mod planner;
pub mod remap;
pub mod rolling;
pub mod state;
pub mod telemetry;
pub mod version;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding installed-state annotations and add-on PKI resources
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Prefix for the per-add-on installed-state annotation on the system namespace
pub const INSTALLED_STATE_ANNOTATION_PREFIX: &str = "addons.k8s.io/";

/// Annotation written on nodes that require a rolling restart
pub const NEEDS_UPDATE_ANNOTATION: &str = "kops.k8s.io/needs-update";

/// Label key identifying the tool that manages an applied object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label key carrying the add-on name on every applied object
pub const ADDON_NAME_LABEL: &str = "addon.kops.k8s.io/name";

/// Label key carrying the add-on version on every applied object
pub const ADDON_VERSION_LABEL: &str = "addon.kops.k8s.io/version";

/// Value written under [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "trellis";

/// Field manager used for server-side apply and merge patches
pub const FIELD_MANAGER: &str = "trellis-addons";
