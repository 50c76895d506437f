//! Per-cluster apply capability
//!
//! Every target in a fleet carries a [`ClusterApply`] implementation. The
//! lifecycle layer only ever talks to clusters through this trait, so tests
//! swap in mocks or recording fakes and production uses [`KubeApplier`].
//!
//! # Example
//!
//! ```text
//! let applier = KubeApplier::new(client, "https://10.0.0.7:6443");
//! applier.create("blog", manifest, WaitOptions::default()).await?;
//! ```

mod kube_applier;

pub use kube_applier::KubeApplier;

use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use rudder_common::{Error, Result};

/// Readiness wait settings for create and update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    /// Upper bound for the readiness wait
    pub timeout: Duration,
    /// Whether to wait for resources to become ready at all
    pub wait: bool,
}

impl WaitOptions {
    /// Wait settings from the wire representation (timeout in seconds)
    pub fn from_request(timeout_secs: i64, wait: bool) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs.max(0) as u64),
            wait,
        }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            wait: false,
        }
    }
}

/// Settings for an update from one manifest to another
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Take field ownership and recreate objects that cannot be patched
    pub force: bool,
    /// Restart the pods of updated workloads
    pub recreate: bool,
    /// Readiness wait after the update
    pub wait: WaitOptions,
}

/// Operations a release module runs against one cluster
///
/// Manifests are multi-document YAML strings as produced by the classifier.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApply: Send + Sync {
    /// Create every resource in `manifest`
    async fn create(&self, namespace: &str, manifest: &str, wait: WaitOptions) -> Result<()>;

    /// Move the cluster from `current` to `target`
    async fn update(
        &self,
        namespace: &str,
        current: &str,
        target: &str,
        options: UpdateOptions,
    ) -> Result<()>;

    /// Describe the live state of every resource in `manifest`
    async fn get(&self, namespace: &str, manifest: &str) -> Result<String>;

    /// Delete every resource in `manifest`.
    ///
    /// Resources that could not be deleted are reported in the returned list;
    /// an `Err` means the call itself failed.
    async fn delete(&self, namespace: &str, manifest: &str) -> Result<Vec<String>>;
}

/// A cluster that has no usable credentials.
///
/// Stands in for the control plane when its credentials could not be loaded,
/// so member targets still run while every control-plane operation fails.
#[derive(Clone, Debug)]
pub struct UnconfiguredCluster {
    target: String,
    reason: String,
}

impl UnconfiguredCluster {
    /// Create a placeholder for `target` failing with `reason`
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }

    fn error(&self) -> Error {
        Error::configuration_for(&self.target, &self.reason)
    }
}

#[async_trait]
impl ClusterApply for UnconfiguredCluster {
    async fn create(&self, _: &str, _: &str, _: WaitOptions) -> Result<()> {
        Err(self.error())
    }

    async fn update(&self, _: &str, _: &str, _: &str, _: UpdateOptions) -> Result<()> {
        Err(self.error())
    }

    async fn get(&self, _: &str, _: &str) -> Result<String> {
        Err(self.error())
    }

    async fn delete(&self, _: &str, _: &str) -> Result<Vec<String>> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_options_from_request() {
        let wait = WaitOptions::from_request(500, true);
        assert_eq!(wait.timeout, Duration::from_secs(500));
        assert!(wait.wait);

        let wait = WaitOptions::from_request(-3, false);
        assert_eq!(wait.timeout, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_unconfigured_cluster_fails_every_operation() {
        let cluster = UnconfiguredCluster::new("federation", "no federation credentials");

        let err = cluster
            .create("default", "---", WaitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.target(), Some("federation"));

        assert!(cluster
            .update("default", "---", "---", UpdateOptions::default())
            .await
            .is_err());
        assert!(cluster.get("default", "---").await.is_err());

        let err = cluster.delete("default", "---").await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("no federation credentials"));
    }
}
