//! Common building blocks for rudder-federation: errors, YAML parsing,
//! Kubernetes client helpers, retry and telemetry setup.

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port the release module listens on (matches Helm's rudder port)
pub const DEFAULT_GRPC_PORT: u16 = 10001;

/// Namespace holding the federation credentials ConfigMap when none is configured
pub const DEFAULT_CREDENTIALS_NAMESPACE: &str = "kube-system";

/// Name of the ConfigMap carrying federation control-plane credentials
pub const FEDERATION_CREDENTIALS_CONFIG_MAP: &str = "federation-credentials";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "rudder-federation";
