//! Member cluster registry
//!
//! The federation control plane keeps one `Cluster` object per member.
//! Listing them is the only way the module learns which clusters a release
//! has to reach.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use rudder_common::kube_utils::build_api_resource;
use rudder_common::{Error, Result};

/// API version of the federation `Cluster` type
pub const DEFAULT_REGISTRY_API_VERSION: &str = "federation/v1beta1";

/// A registered member cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterDescriptor {
    /// Name of the `Cluster` object
    pub name: String,
    /// First advertised API server address
    pub server_address: String,
}

impl ClusterDescriptor {
    /// Extract the descriptor from a federation `Cluster` object.
    ///
    /// Only the first entry of `spec.serverAddressByClientCIDRs` is used.
    pub fn from_cluster(cluster: &DynamicObject) -> Result<Self> {
        let name = cluster.name_any();
        let server_address = cluster
            .data
            .pointer("/spec/serverAddressByClientCIDRs/0/serverAddress")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::discovery(format!("cluster {} advertises no server address", name))
            })?;

        Ok(Self {
            name,
            server_address: server_address.to_string(),
        })
    }
}

/// Source of the current member cluster list
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// List every registered member, in registry order
    async fn list_member_clusters(&self) -> Result<Vec<ClusterDescriptor>>;
}

/// [`ClusterRegistry`] reading federation `Cluster` objects
pub struct FederationRegistry {
    client: Client,
    resource: ApiResource,
}

impl FederationRegistry {
    /// Create a registry for `Cluster` objects of `api_version`
    pub fn new(client: Client, api_version: &str) -> Self {
        Self {
            client,
            resource: build_api_resource(api_version, "Cluster"),
        }
    }
}

#[async_trait]
impl ClusterRegistry for FederationRegistry {
    async fn list_member_clusters(&self) -> Result<Vec<ClusterDescriptor>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        let clusters = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::discovery(format!("cannot list member clusters: {}", e)))?;

        let members = clusters
            .items
            .iter()
            .map(ClusterDescriptor::from_cluster)
            .collect::<Result<Vec<_>>>()?;
        debug!(count = members.len(), "listed member clusters");
        Ok(members)
    }
}

/// [`ClusterRegistry`] standing in when the federation control plane cannot
/// be reached. Every listing fails with a discovery error naming the cause.
pub struct UnconfiguredRegistry {
    reason: String,
}

impl UnconfiguredRegistry {
    /// Create a registry that fails with `reason`
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ClusterRegistry for UnconfiguredRegistry {
    async fn list_member_clusters(&self) -> Result<Vec<ClusterDescriptor>> {
        Err(Error::discovery(format!(
            "federation is not configured: {}",
            self.reason
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cluster(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_descriptor_uses_first_server_address() {
        let obj = cluster(json!({
            "apiVersion": "federation/v1beta1",
            "kind": "Cluster",
            "metadata": { "name": "us-east" },
            "spec": {
                "serverAddressByClientCIDRs": [
                    { "clientCIDR": "0.0.0.0/0", "serverAddress": "https://10.0.0.7:6443" },
                    { "clientCIDR": "10.0.0.0/8", "serverAddress": "https://internal:6443" }
                ]
            }
        }));

        let descriptor = ClusterDescriptor::from_cluster(&obj).unwrap();
        assert_eq!(descriptor.name, "us-east");
        assert_eq!(descriptor.server_address, "https://10.0.0.7:6443");
    }

    #[test]
    fn test_cluster_without_address_fails_discovery() {
        let obj = cluster(json!({
            "apiVersion": "federation/v1beta1",
            "kind": "Cluster",
            "metadata": { "name": "eu-west" },
            "spec": { "serverAddressByClientCIDRs": [] }
        }));

        let err = ClusterDescriptor::from_cluster(&obj).unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
        assert!(err.to_string().contains("eu-west"));
    }

    #[tokio::test]
    async fn test_unconfigured_registry_fails_discovery_with_cause() {
        let registry = UnconfiguredRegistry::new("no federation credentials");
        let err = registry.list_member_clusters().await.unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
        assert!(err
            .to_string()
            .contains("federation is not configured: no federation credentials"));
    }
}
