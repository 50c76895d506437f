//! Building cluster clients for fleet targets

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use rudder_common::kube_utils::client_from_kubeconfig;
use rudder_common::{Error, Result};

use super::credentials::{kubeconfig_document, FederationCredentials};
use super::registry::ClusterDescriptor;
use crate::apply::{ClusterApply, KubeApplier};

/// Name the control plane goes by in logs and kubeconfigs
pub const CONTROL_PLANE_NAME: &str = "federation";

/// Turns cluster descriptions into apply clients
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Address used to identify the control plane
    fn control_plane_host(&self) -> String;

    /// Client for the federation control plane
    async fn connect_control_plane(&self) -> Result<Arc<dyn ClusterApply>>;

    /// Client for one member cluster
    async fn connect_member(&self, cluster: &ClusterDescriptor) -> Result<Arc<dyn ClusterApply>>;
}

/// [`ClusterConnector`] producing kube-backed appliers
pub struct KubeConnector {
    credentials: Option<Arc<FederationCredentials>>,
    insecure_member_tls: bool,
}

impl KubeConnector {
    /// Create a connector.
    ///
    /// Without credentials every control-plane connection fails with a
    /// configuration error. `insecure_member_tls` skips verification of
    /// member API server certificates.
    pub fn new(credentials: Option<Arc<FederationCredentials>>, insecure_member_tls: bool) -> Self {
        Self {
            credentials,
            insecure_member_tls,
        }
    }

    fn member_kubeconfig(&self, cluster: &ClusterDescriptor) -> serde_json::Value {
        kubeconfig_document(
            &cluster.name,
            json!({
                "server": cluster.server_address,
                "insecure-skip-tls-verify": self.insecure_member_tls,
            }),
            json!({}),
        )
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    fn control_plane_host(&self) -> String {
        self.credentials
            .as_ref()
            .map(|c| c.host.clone())
            .unwrap_or_else(|| CONTROL_PLANE_NAME.to_string())
    }

    async fn connect_control_plane(&self) -> Result<Arc<dyn ClusterApply>> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            Error::configuration_for(CONTROL_PLANE_NAME, "federation credentials are not loaded")
        })?;

        let client = client_from_kubeconfig(credentials.kubeconfig(CONTROL_PLANE_NAME))
            .await
            .map_err(|e| Error::configuration_for(&credentials.host, e.to_string()))?;
        Ok(Arc::new(KubeApplier::new(client, &credentials.host)))
    }

    async fn connect_member(&self, cluster: &ClusterDescriptor) -> Result<Arc<dyn ClusterApply>> {
        debug!(
            cluster = %cluster.name,
            server = %cluster.server_address,
            insecure_tls = self.insecure_member_tls,
            "connecting member cluster"
        );
        let client = client_from_kubeconfig(self.member_kubeconfig(cluster))
            .await
            .map_err(|e| {
                Error::discovery(format!("cannot build client for {}: {}", cluster.name, e))
            })?;
        Ok(Arc::new(KubeApplier::new(client, &cluster.server_address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> ClusterDescriptor {
        ClusterDescriptor {
            name: "us-east".to_string(),
            server_address: "https://10.0.0.7:6443".to_string(),
        }
    }

    #[test]
    fn test_member_kubeconfig_follows_tls_setting() {
        let relaxed = KubeConnector::new(None, true).member_kubeconfig(&member());
        assert_eq!(relaxed["clusters"][0]["cluster"]["insecure-skip-tls-verify"], true);
        assert_eq!(relaxed["clusters"][0]["cluster"]["server"], "https://10.0.0.7:6443");
        assert_eq!(relaxed["current-context"], "us-east");

        let strict = KubeConnector::new(None, false).member_kubeconfig(&member());
        assert_eq!(strict["clusters"][0]["cluster"]["insecure-skip-tls-verify"], false);
    }

    #[test]
    fn test_member_kubeconfig_is_valid_kubeconfig() {
        let doc = KubeConnector::new(None, true).member_kubeconfig(&member());
        let parsed: kube::config::Kubeconfig = serde_json::from_value(doc).unwrap();
        assert_eq!(parsed.contexts.len(), 1);
    }

    #[tokio::test]
    async fn test_control_plane_without_credentials_is_configuration_error() {
        let connector = KubeConnector::new(None, true);
        assert_eq!(connector.control_plane_host(), CONTROL_PLANE_NAME);

        let err = connector.connect_control_plane().await.err().unwrap();
        assert_eq!(err.target(), Some(CONTROL_PLANE_NAME));
        assert!(!err.is_retryable());
    }
}
