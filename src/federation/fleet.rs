//! Fleet resolution
//!
//! A [`Fleet`] is the set of clusters one lifecycle call acts on: the
//! federation control plane plus every registered member. It is rebuilt on
//! every call so membership changes are picked up immediately.

use std::sync::Arc;

use tracing::{info, warn};

use rudder_common::{Error, Result};

use super::connector::{ClusterConnector, CONTROL_PLANE_NAME};
use super::registry::ClusterRegistry;
use crate::apply::{ClusterApply, UnconfiguredCluster};
use crate::manifest::Scope;

/// Role of a target within the fleet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetRole {
    /// The federation control plane
    ControlPlane,
    /// A member cluster
    Member,
}

impl TargetRole {
    /// Manifest half a target of this role receives
    pub fn scope(self) -> Scope {
        match self {
            TargetRole::ControlPlane => Scope::ControlPlane,
            TargetRole::Member => Scope::Member,
        }
    }
}

impl std::fmt::Display for TargetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetRole::ControlPlane => write!(f, "control-plane"),
            TargetRole::Member => write!(f, "member"),
        }
    }
}

/// One cluster a lifecycle operation is dispatched to
#[derive(Clone)]
pub struct Target {
    /// Cluster name
    pub name: String,
    /// API server address, used as the target's identity
    pub host: String,
    /// Control plane or member
    pub role: TargetRole,
    /// Apply capability for this cluster
    pub client: Arc<dyn ClusterApply>,
}

impl Target {
    /// Identity used in logs, errors and merged status output
    pub fn identity(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// The control plane and all members for one call
#[derive(Clone, Debug)]
pub struct Fleet {
    /// The federation control plane
    pub control_plane: Target,
    /// Member clusters in registry order
    pub members: Vec<Target>,
}

impl Fleet {
    /// All targets, control plane first
    pub fn targets(&self) -> Vec<Target> {
        std::iter::once(self.control_plane.clone())
            .chain(self.members.iter().cloned())
            .collect()
    }

    /// Number of targets, including the control plane
    pub fn len(&self) -> usize {
        self.members.len() + 1
    }

    /// A fleet always holds the control plane
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Resolves the live fleet from the registry
pub struct FleetResolver {
    registry: Arc<dyn ClusterRegistry>,
    connector: Arc<dyn ClusterConnector>,
}

impl FleetResolver {
    /// Create a resolver
    pub fn new(registry: Arc<dyn ClusterRegistry>, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    /// List members and connect to every cluster.
    ///
    /// Registry and member connection failures fail the whole resolution.
    /// A control plane that cannot be connected stays in the fleet and fails
    /// each operation with a configuration error.
    pub async fn resolve(&self) -> Result<Fleet> {
        let clusters = self.registry.list_member_clusters().await.map_err(|e| match e {
            Error::Discovery { .. } => e,
            other => Error::discovery(other.to_string()),
        })?;

        let host = self.connector.control_plane_host();
        let control_client = match self.connector.connect_control_plane().await {
            Ok(client) => client,
            Err(e) => {
                warn!(host = %host, error = %e, "control plane unavailable, its operations will fail");
                Arc::new(UnconfiguredCluster::new(&host, e.to_string()))
            }
        };
        let control_plane = Target {
            name: CONTROL_PLANE_NAME.to_string(),
            host,
            role: TargetRole::ControlPlane,
            client: control_client,
        };

        let mut members = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            let client = self
                .connector
                .connect_member(cluster)
                .await
                .map_err(|e| match e {
                    Error::Discovery { .. } => e,
                    other => Error::discovery(format!("{}: {}", cluster.name, other)),
                })?;
            members.push(Target {
                name: cluster.name.clone(),
                host: cluster.server_address.clone(),
                role: TargetRole::Member,
                client,
            });
        }

        info!(members = members.len(), "resolved fleet");
        Ok(Fleet {
            control_plane,
            members,
        })
    }
}
