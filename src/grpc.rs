//! gRPC surface of the release module
//!
//! Maps `hapi.services.rudder.ReleaseModuleService` requests onto
//! [`LifecycleService`] and lifecycle errors onto gRPC status codes.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use rudder_common::Error;
use rudder_proto::{
    DeleteReleaseRequest, DeleteReleaseResponse, InstallReleaseRequest,
    InstallReleaseResponse, Release, ReleaseModuleService, ReleaseModuleServiceServer,
    ReleaseStatusRequest, ReleaseStatusResponse, RollbackReleaseRequest, RollbackReleaseResponse,
    UpgradeReleaseRequest, UpgradeReleaseResponse, VersionReleaseRequest, VersionReleaseResponse,
};

use crate::apply::{UpdateOptions, WaitOptions};
use crate::lifecycle::{LifecycleService, ReleaseManifest};

/// Map a lifecycle error onto a gRPC status
pub fn error_to_status(err: Error) -> Status {
    let message = err.to_string();
    match err {
        Error::Classification { .. } | Error::Substitution { .. } | Error::Serialization { .. } => {
            Status::invalid_argument(message)
        }
        Error::Discovery { .. } => Status::unavailable(message),
        Error::Configuration { .. } => Status::failed_precondition(message),
        Error::Kube { .. } | Error::Execution { .. } | Error::Internal { .. } => {
            Status::internal(message)
        }
    }
}

fn release_manifest(release: &Release) -> ReleaseManifest {
    ReleaseManifest {
        name: release.name.clone(),
        namespace: release.namespace.clone(),
        manifest: release.manifest.clone(),
        config: release
            .config
            .as_ref()
            .map(|c| c.raw.clone())
            .unwrap_or_default(),
    }
}

fn required(release: Option<Release>, field: &str) -> Result<Release, Status> {
    release.ok_or_else(|| Status::invalid_argument(format!("{} release is required", field)))
}

fn update_options(timeout: i64, wait: bool, recreate: bool, force: bool) -> UpdateOptions {
    UpdateOptions {
        force,
        recreate,
        wait: WaitOptions::from_request(timeout, wait),
    }
}

/// `ReleaseModuleService` backed by a [`LifecycleService`]
#[derive(Clone)]
pub struct ReleaseServer {
    lifecycle: Arc<LifecycleService>,
}

impl ReleaseServer {
    /// Create a server
    pub fn new(lifecycle: Arc<LifecycleService>) -> Self {
        Self { lifecycle }
    }

    /// Wrap into a tonic service
    pub fn into_service(self) -> ReleaseModuleServiceServer<Self> {
        ReleaseModuleServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl ReleaseModuleService for ReleaseServer {
    #[instrument(skip(self, _request))]
    async fn version(
        &self,
        _request: Request<VersionReleaseRequest>,
    ) -> Result<Response<VersionReleaseResponse>, Status> {
        let version = self.lifecycle.version();
        Ok(Response::new(VersionReleaseResponse {
            name: version.name,
            version: version.version,
        }))
    }

    #[instrument(skip(self, request))]
    async fn install_release(
        &self,
        request: Request<InstallReleaseRequest>,
    ) -> Result<Response<InstallReleaseResponse>, Status> {
        let release = required(request.into_inner().release, "install")?;
        self.lifecycle
            .install(&release_manifest(&release))
            .await
            .map_err(error_to_status)?;
        Ok(Response::new(InstallReleaseResponse {
            release: Some(release),
            result: None,
        }))
    }

    #[instrument(skip(self, request))]
    async fn delete_release(
        &self,
        request: Request<DeleteReleaseRequest>,
    ) -> Result<Response<DeleteReleaseResponse>, Status> {
        let release = required(request.into_inner().release, "delete")?;
        let leftovers = self
            .lifecycle
            .delete(&release_manifest(&release))
            .await
            .map_err(error_to_status)?;
        Ok(Response::new(DeleteReleaseResponse {
            release: Some(release),
            result: Some(rudder_proto::Result {
                info: String::new(),
                log: leftovers,
            }),
        }))
    }

    #[instrument(skip(self, request))]
    async fn rollback_release(
        &self,
        request: Request<RollbackReleaseRequest>,
    ) -> Result<Response<RollbackReleaseResponse>, Status> {
        let req = request.into_inner();
        let current = required(req.current, "current")?;
        let target = required(req.target, "target")?;
        self.lifecycle
            .rollback(
                &release_manifest(&current),
                &release_manifest(&target),
                update_options(req.timeout, req.wait, req.recreate, req.force),
            )
            .await
            .map_err(error_to_status)?;
        Ok(Response::new(RollbackReleaseResponse {
            release: Some(target),
            result: None,
        }))
    }

    #[instrument(skip(self, request))]
    async fn upgrade_release(
        &self,
        request: Request<UpgradeReleaseRequest>,
    ) -> Result<Response<UpgradeReleaseResponse>, Status> {
        let req = request.into_inner();
        let current = required(req.current, "current")?;
        let target = required(req.target, "target")?;
        self.lifecycle
            .upgrade(
                &release_manifest(&current),
                &release_manifest(&target),
                update_options(req.timeout, req.wait, req.recreate, req.force),
            )
            .await
            .map_err(error_to_status)?;
        Ok(Response::new(UpgradeReleaseResponse {
            release: Some(target),
            result: None,
        }))
    }

    #[instrument(skip(self, request))]
    async fn release_status(
        &self,
        request: Request<ReleaseStatusRequest>,
    ) -> Result<Response<ReleaseStatusResponse>, Status> {
        let mut release = required(request.into_inner().release, "status")?;
        let resources = self
            .lifecycle
            .status(&release_manifest(&release))
            .await
            .map_err(error_to_status)?;

        let mut info = release.info.take().unwrap_or_default();
        info.status.get_or_insert_with(Default::default).resources = resources;
        release.info = Some(info.clone());

        Ok(Response::new(ReleaseStatusResponse {
            release: Some(release),
            info: Some(info),
        }))
    }
}

/// Serve the release module on `addr` until ctrl-c
pub async fn serve(addr: SocketAddr, lifecycle: Arc<LifecycleService>) -> anyhow::Result<()> {
    info!(%addr, "release module listening");
    Server::builder()
        .add_service(ReleaseServer::new(lifecycle).into_service())
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    info!("release module stopped");
    Ok(())
}
