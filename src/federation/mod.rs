//! Federation membership and connectivity
//!
//! - [`credentials`]: control-plane credentials loaded at startup
//! - [`registry`]: lists registered member clusters
//! - [`connector`]: builds apply clients per cluster
//! - [`fleet`]: resolves the control plane and members for one call

pub mod connector;
pub mod credentials;
pub mod fleet;
pub mod registry;

pub use connector::{ClusterConnector, KubeConnector, CONTROL_PLANE_NAME};
pub use credentials::{FederationAuth, FederationCredentials};
pub use fleet::{Fleet, FleetResolver, Target, TargetRole};
pub use registry::{
    ClusterDescriptor, ClusterRegistry, FederationRegistry, UnconfiguredRegistry,
    DEFAULT_REGISTRY_API_VERSION,
};
