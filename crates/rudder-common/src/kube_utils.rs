//! Kubernetes client helpers built on kube-rs
//!
//! Clients for the local cluster, the federation control plane and every
//! member cluster are all built here, from either a kubeconfig file or an
//! in-memory kubeconfig document.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Discovery};
use kube::{Client, Config};
use tracing::trace;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path.
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `$KUBECONFIG` / `~/.kube/config`).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::configuration(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::configuration(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::configuration(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| Error::configuration(format!("failed to create client: {}", e)))
}

/// Create a kube client from an in-memory kubeconfig document.
///
/// The document uses kubeconfig field names (`clusters`, `users`, `contexts`,
/// `current-context`); certificate data fields must be base64 encoded.
pub async fn client_from_kubeconfig(document: serde_json::Value) -> Result<Client, Error> {
    let kubeconfig: Kubeconfig = serde_json::from_value(document)
        .map_err(|e| Error::serialization_for_kind("Config", e.to_string()))?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::configuration(format!("invalid kubeconfig: {}", e)))?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| Error::configuration(format!("failed to create client: {}", e)))
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use rudder_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from an apiVersion and kind without discovery.
///
/// Used for resources whose shape is known up front, such as the federation
/// `Cluster` registry type.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Pluralize a Kubernetes resource kind with the usual English rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Run API discovery with a small retry budget.
///
/// Discovery can fail transiently while aggregated API servers come up.
pub async fn run_discovery(client: &Client) -> Result<Discovery, Error> {
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        ..RetryConfig::default()
    };
    retry_with_backoff(&config, "api-discovery", || {
        let client = client.clone();
        async move {
            Discovery::new(client)
                .run()
                .await
                .map_err(|e| Error::internal_with_context("api-discovery", e.to_string()))
        }
    })
    .await
}

/// Poll until a condition is met or timeout is reached
///
/// `check_fn` returns `Ok(true)` when done, `Ok(false)` to keep polling. Check
/// errors are treated as "not yet" and polling continues.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("condition not yet met"),
            Err(e) => trace!(error = %e, "poll check failed, retrying"),
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
