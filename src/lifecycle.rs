//! Release lifecycle across the federation
//!
//! Every call follows the same pipeline:
//!
//! ```text
//! manifest ──▶ substitution (install only) ──▶ split ──▶ resolve fleet ──▶ fan-out
//! ```
//!
//! Substitution, classification and fleet discovery failures abort the call
//! before any cluster is touched. Per-target failures are only reported after
//! every target has finished.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use rudder_common::Result;

use crate::apply::{UpdateOptions, WaitOptions};
use crate::fanout::{run_fanout, AggregateResult};
use crate::federation::{Fleet, FleetResolver};
use crate::manifest::{split, ClassificationPolicy, ObjectLookup, SplitManifest, Substitutor};

/// Name reported by the Version call
pub const MODULE_NAME: &str = "helm-rudder-federation";

/// Readiness timeout applied to installs
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(500);

/// The parts of a release the lifecycle operations act on
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseManifest {
    /// Release name
    pub name: String,
    /// Namespace namespaced resources default to
    pub namespace: String,
    /// Rendered multi-document manifest
    pub manifest: String,
    /// Raw release values, read for install-time substitutions
    pub config: String,
}

/// Version information of the module
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInfo {
    /// Module name
    pub name: String,
    /// Module version
    pub version: String,
}

/// Install, upgrade, rollback, delete and status of federated releases
pub struct LifecycleService {
    resolver: FleetResolver,
    policy: ClassificationPolicy,
    substitutor: Substitutor,
    lookup: Arc<dyn ObjectLookup>,
    install_timeout: Duration,
}

impl LifecycleService {
    /// Create a service.
    ///
    /// `lookup` reads objects from the cluster the module runs in and is only
    /// used when a release config asks for substitutions.
    pub fn new(
        resolver: FleetResolver,
        policy: ClassificationPolicy,
        lookup: Arc<dyn ObjectLookup>,
    ) -> Self {
        Self {
            resolver,
            policy,
            substitutor: Substitutor::new(),
            lookup,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }

    /// Override the readiness timeout used for installs
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Name and version of the module
    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            name: MODULE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Create a release on the control plane and every member
    pub async fn install(&self, release: &ReleaseManifest) -> Result<()> {
        info!(release = %release.name, namespace = %release.namespace, "installing release");

        let manifest = self
            .substitutor
            .substitute(&release.manifest, &release.config, self.lookup.as_ref())
            .await?;
        let halves = Arc::new(split(&manifest, &self.policy)?);
        let fleet = self.resolver.resolve().await?;

        let namespace = release.namespace.clone();
        let wait = WaitOptions {
            timeout: self.install_timeout,
            wait: false,
        };
        let result = run_fanout("install", &fleet.targets(), |target| {
            let halves = Arc::clone(&halves);
            let namespace = namespace.clone();
            async move {
                let manifest = halves.for_scope(target.role.scope());
                target.client.create(&namespace, manifest, wait).await
            }
        })
        .await;

        report("install", &release.name, &fleet, &result);
        result.into_result().map(|_| ())
    }

    /// Move a release to a newer revision
    pub async fn upgrade(
        &self,
        current: &ReleaseManifest,
        target: &ReleaseManifest,
        options: UpdateOptions,
    ) -> Result<()> {
        self.update("upgrade", current, target, options).await
    }

    /// Move a release back to an earlier revision
    pub async fn rollback(
        &self,
        current: &ReleaseManifest,
        target: &ReleaseManifest,
        options: UpdateOptions,
    ) -> Result<()> {
        self.update("rollback", current, target, options).await
    }

    async fn update(
        &self,
        operation: &'static str,
        current: &ReleaseManifest,
        target: &ReleaseManifest,
        options: UpdateOptions,
    ) -> Result<()> {
        info!(
            release = %target.name,
            namespace = %target.namespace,
            force = options.force,
            recreate = options.recreate,
            wait = options.wait.wait,
            "{} release", operation
        );

        let current_halves = Arc::new(split(&current.manifest, &self.policy)?);
        let target_halves = Arc::new(split(&target.manifest, &self.policy)?);
        let fleet = self.resolver.resolve().await?;

        let namespace = target.namespace.clone();
        let result = run_fanout(operation, &fleet.targets(), |t| {
            let current_halves = Arc::clone(&current_halves);
            let target_halves = Arc::clone(&target_halves);
            let namespace = namespace.clone();
            async move {
                let scope = t.role.scope();
                t.client
                    .update(
                        &namespace,
                        current_halves.for_scope(scope),
                        target_halves.for_scope(scope),
                        options,
                    )
                    .await
            }
        })
        .await;

        report(operation, &target.name, &fleet, &result);
        result.into_result().map(|_| ())
    }

    /// Delete a release everywhere.
    ///
    /// Returns resources that could not be deleted, each prefixed with the
    /// identity of its cluster.
    pub async fn delete(&self, release: &ReleaseManifest) -> Result<Vec<String>> {
        info!(release = %release.name, namespace = %release.namespace, "deleting release");

        let halves = Arc::new(split(&release.manifest, &self.policy)?);
        let fleet = self.resolver.resolve().await?;

        let namespace = release.namespace.clone();
        let result = run_fanout("delete", &fleet.targets(), |target| {
            let halves = Arc::clone(&halves);
            let namespace = namespace.clone();
            async move {
                let failures = target
                    .client
                    .delete(&namespace, halves.for_scope(target.role.scope()))
                    .await?;
                Ok(failures
                    .into_iter()
                    .map(|f| format!("{}: {}", target.identity(), f))
                    .collect::<Vec<_>>())
            }
        })
        .await;

        report("delete", &release.name, &fleet, &result);
        let leftovers: Vec<String> = result.into_result()?.into_iter().flatten().collect();
        if !leftovers.is_empty() {
            info!(release = %release.name, count = leftovers.len(), "some resources were not deleted");
        }
        Ok(leftovers)
    }

    /// Live state of a release, one labelled block per cluster
    pub async fn status(&self, release: &ReleaseManifest) -> Result<String> {
        info!(release = %release.name, namespace = %release.namespace, "release status");

        let halves = Arc::new(split(&release.manifest, &self.policy)?);
        let fleet = self.resolver.resolve().await?;

        let namespace = release.namespace.clone();
        let result = run_fanout("status", &fleet.targets(), |target| {
            let halves = Arc::clone(&halves);
            let namespace = namespace.clone();
            async move {
                target
                    .client
                    .get(&namespace, halves.for_scope(target.role.scope()))
                    .await
            }
        })
        .await;

        report("status", &release.name, &fleet, &result);
        result.merge_status()
    }

    /// Partition a manifest with the configured policy
    pub fn split(&self, manifest: &str) -> Result<SplitManifest> {
        split(manifest, &self.policy)
    }
}

fn report<T>(operation: &str, release: &str, fleet: &Fleet, result: &AggregateResult<T>) {
    match result.first_error() {
        None => info!(
            release = %release,
            targets = fleet.len(),
            "{} succeeded on every cluster", operation
        ),
        Some(e) => error!(
            release = %release,
            targets = fleet.len(),
            failed = result.failed_count(),
            error = %e,
            "{} failed", operation
        ),
    }
}
