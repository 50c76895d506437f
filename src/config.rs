//! Command-line configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use rudder_common::telemetry::LogFormat;
use rudder_common::{
    DEFAULT_CREDENTIALS_NAMESPACE, DEFAULT_GRPC_PORT, FEDERATION_CREDENTIALS_CONFIG_MAP,
};

use crate::federation::DEFAULT_REGISTRY_API_VERSION;
use crate::manifest::ClassificationPolicy;

/// Helm release module that spreads releases across a cluster federation
///
/// Without a subcommand the module serves, taking the `serve` flags directly.
#[derive(Parser, Debug)]
#[command(
    name = "rudder-federation",
    version,
    about,
    long_about = None,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    /// The selected subcommand, `serve` when none is given
    pub fn subcommand(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Serve(self.serve.clone()))
    }
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the release module gRPC API (default)
    Serve(ServeArgs),

    /// Split a manifest file offline and print both halves
    Split(SplitArgs),
}

/// Arguments of `serve`
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address the gRPC server listens on
    #[arg(
        long,
        env = "RUDDER_LISTEN",
        default_value_t = SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_GRPC_PORT))
    )]
    pub listen: SocketAddr,

    /// Namespace of the federation credentials ConfigMap
    #[arg(long, env = "RUDDER_NAMESPACE", default_value = DEFAULT_CREDENTIALS_NAMESPACE)]
    pub credentials_namespace: String,

    /// Name of the federation credentials ConfigMap
    #[arg(long, default_value = FEDERATION_CREDENTIALS_CONFIG_MAP)]
    pub credentials_config_map: String,

    /// Kubeconfig for the local cluster (inferred when omitted)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Which kinds are created in the federation control plane
    #[arg(long, value_enum, default_value_t = PolicyName::FederatedKinds)]
    pub policy: PolicyName,

    /// Skip verification of member API server certificates
    #[arg(long, env = "RUDDER_INSECURE_MEMBER_TLS", default_value_t = true, action = clap::ArgAction::Set)]
    pub insecure_member_tls: bool,

    /// Readiness timeout for installs, in seconds
    #[arg(long, default_value_t = 500)]
    pub install_timeout_secs: u64,

    /// API version of the federation `Cluster` resource
    #[arg(long, default_value = DEFAULT_REGISTRY_API_VERSION)]
    pub registry_api_version: String,

    /// Log output format
    #[arg(long, value_enum, env = "RUDDER_LOG_FORMAT", default_value_t = LogFormatArg::Json)]
    pub log_format: LogFormatArg,
}

impl ServeArgs {
    /// Install readiness timeout
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// Arguments of `split`
#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Manifest file to split
    #[arg(short = 'f', long = "file")]
    pub file: PathBuf,

    /// Which kinds are created in the federation control plane
    #[arg(long, value_enum, default_value_t = PolicyName::FederatedKinds)]
    pub policy: PolicyName,
}

/// Named classification policies
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyName {
    /// Federation API kinds go to the control plane, the rest to members
    FederatedKinds,
    /// PersistentVolumeClaims go to members, the rest to the control plane
    LocalVolumeClaims,
}

impl PolicyName {
    /// Build the policy
    pub fn policy(self) -> ClassificationPolicy {
        match self {
            PolicyName::FederatedKinds => ClassificationPolicy::federated_kinds(),
            PolicyName::LocalVolumeClaims => ClassificationPolicy::local_volume_claims(),
        }
    }
}

/// Log format selectable on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    /// JSON lines
    Json,
    /// Human-readable text
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}
