//! rudder-federation - Helm release module for cluster federations

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use rudder_common::kube_utils::{client_from_kubeconfig, create_client};
use rudder_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use rudder_federation::config::{Cli, Command, ServeArgs, SplitArgs};
use rudder_federation::federation::{
    ClusterRegistry, FederationCredentials, FederationRegistry, FleetResolver, KubeConnector,
    UnconfiguredRegistry, CONTROL_PLANE_NAME,
};
use rudder_federation::grpc;
use rudder_federation::lifecycle::LifecycleService;
use rudder_federation::manifest::{split, KubeObjectLookup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Every kube and tonic client needs a process-wide rustls provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The release module cannot open TLS connections to any cluster.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.subcommand() {
        Command::Serve(args) => run_serve(args).await,
        Command::Split(args) => run_split(args).await,
    }
}

/// Serve the release module until ctrl-c
async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig {
        format: args.log_format.into(),
        ..Default::default()
    })?;

    let local = create_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Cannot initialize Kubernetes connection: {}", e))?;

    let credentials = match FederationCredentials::load(
        &local,
        &args.credentials_namespace,
        &args.credentials_config_map,
    )
    .await
    {
        Ok(credentials) => {
            info!(host = %credentials.host, "loaded federation credentials");
            Some(Arc::new(credentials))
        }
        Err(e) => {
            warn!(
                namespace = %args.credentials_namespace,
                config_map = %args.credentials_config_map,
                error = %e,
                "federation credentials unavailable, lifecycle calls will fail discovery"
            );
            None
        }
    };

    let registry = registry(credentials.as_deref(), &args.registry_api_version).await;
    let resolver = FleetResolver::new(
        registry,
        Arc::new(KubeConnector::new(credentials, args.insecure_member_tls)),
    );
    if args.insecure_member_tls {
        warn!("member API server certificates are not verified");
    }

    let lifecycle = LifecycleService::new(
        resolver,
        args.policy.policy(),
        Arc::new(KubeObjectLookup::new(local)),
    )
    .with_install_timeout(args.install_timeout());

    grpc::serve(args.listen, Arc::new(lifecycle)).await
}

/// Registry listing member clusters.
///
/// The registry lives in the federation control plane. Without usable
/// credentials every lifecycle call fails discovery with the cause.
async fn registry(
    credentials: Option<&FederationCredentials>,
    api_version: &str,
) -> Arc<dyn ClusterRegistry> {
    let Some(credentials) = credentials else {
        return Arc::new(UnconfiguredRegistry::new("no federation credentials"));
    };

    match client_from_kubeconfig(credentials.kubeconfig(CONTROL_PLANE_NAME)).await {
        Ok(client) => Arc::new(FederationRegistry::new(client, api_version)),
        Err(e) => {
            warn!(
                host = %credentials.host,
                error = %e,
                "cannot build control-plane client, member discovery will fail"
            );
            Arc::new(UnconfiguredRegistry::new(format!(
                "control-plane client for {}: {}",
                credentials.host, e
            )))
        }
    }
}

/// Split a manifest file and print both halves
async fn run_split(args: SplitArgs) -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig {
        format: LogFormat::Text,
        ..Default::default()
    })?;

    let manifest = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read manifest {:?}: {}", args.file, e))?;

    let halves = split(&manifest, &args.policy.policy())?;
    println!("# federation control plane");
    println!("{}", halves.control_plane);
    println!("# member clusters");
    println!("{}", halves.member);
    Ok(())
}
