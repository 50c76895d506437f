//! Protocol definitions for the Helm release module ("rudder").
//!
//! Tiller talks to a release module over gRPC, delegating every Kubernetes
//! interaction for a release to it. This crate carries the subset of the
//! `hapi` messages the federation module reads or echoes back, and the server
//! side of `hapi.services.rudder.ReleaseModuleService`.
//!
//! The bindings are generated at build time from the `hapi` protos under
//! `proto/`, as served by Helm v2's Tiller. Chart payloads and hooks are
//! decoded in full so a release echoed back to Tiller loses nothing.
//!
//! # Service
//!
//! | RPC               | Request                  | Response                  |
//! |-------------------|--------------------------|---------------------------|
//! | `Version`         | [`VersionReleaseRequest`]  | [`VersionReleaseResponse`]  |
//! | `InstallRelease`  | [`InstallReleaseRequest`]  | [`InstallReleaseResponse`]  |
//! | `DeleteRelease`   | [`DeleteReleaseRequest`]   | [`DeleteReleaseResponse`]   |
//! | `RollbackRelease` | [`RollbackReleaseRequest`] | [`RollbackReleaseResponse`] |
//! | `UpgradeRelease`  | [`UpgradeReleaseRequest`]  | [`UpgradeReleaseResponse`]  |
//! | `ReleaseStatus`   | [`ReleaseStatusRequest`]   | [`ReleaseStatusResponse`]   |

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

/// Generated protobuf types, one module per `hapi` package
pub mod hapi {
    /// Charts, their metadata and values
    pub mod chart {
        tonic::include_proto!("hapi.chart");
    }

    /// Releases, their status and hooks
    pub mod release {
        tonic::include_proto!("hapi.release");
    }

    /// Services Tiller calls
    pub mod services {
        /// The release module service
        pub mod rudder {
            tonic::include_proto!("hapi.services.rudder");
        }
    }
}

pub use hapi::chart::{Chart, Config, Metadata, Template, Value};
pub use hapi::release::{hook, status, Hook, Info, Release, Status, TestRun, TestSuite};
pub use hapi::services::rudder::release_module_service_server::{
    ReleaseModuleService, ReleaseModuleServiceServer,
};
pub use hapi::services::rudder::*;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_release_roundtrip_keeps_manifest_and_namespace() {
        let release = Release {
            name: "wp4".to_string(),
            namespace: "blog".to_string(),
            manifest: "---\nkind: Secret\n---".to_string(),
            version: 3,
            ..Default::default()
        };
        let bytes = release.encode_to_vec();
        let decoded = Release::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, release);
    }

    #[test]
    fn test_release_roundtrip_keeps_chart_and_hooks() {
        let release = Release {
            name: "wp4".to_string(),
            chart: Some(Chart {
                metadata: Some(Metadata {
                    name: "wordpress".to_string(),
                    version: "0.6.2".to_string(),
                    ..Default::default()
                }),
                templates: vec![Template {
                    name: "templates/secrets.yaml".to_string(),
                    data: b"kind: Secret".to_vec(),
                }],
                ..Default::default()
            }),
            hooks: vec![Hook {
                name: "wp4-db-init".to_string(),
                kind: "Job".to_string(),
                events: vec![hook::Event::PostInstall as i32],
                ..Default::default()
            }],
            ..Default::default()
        };

        let decoded = Release::decode(release.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, release);
        assert_eq!(decoded.chart.unwrap().metadata.unwrap().name, "wordpress");
        assert_eq!(decoded.hooks[0].events, [hook::Event::PostInstall as i32]);
    }

    #[test]
    fn test_status_code_enum() {
        let status = Status {
            code: status::Code::Deployed as i32,
            ..Default::default()
        };
        assert_eq!(status.code(), status::Code::Deployed);
    }

    #[test]
    fn test_upgrade_request_field_tags() {
        // Timeout is tag 3, Wait tag 4, Recreate tag 5, Force tag 6
        let req = UpgradeReleaseRequest {
            timeout: 300,
            wait: true,
            recreate: false,
            force: true,
            ..Default::default()
        };
        let decoded = UpgradeReleaseRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.timeout, 300);
        assert!(decoded.wait);
        assert!(decoded.force);
        assert!(!decoded.recreate);
    }

    #[test]
    fn test_service_name() {
        use tonic::server::NamedService;

        struct Noop;
        #[tonic::async_trait]
        impl ReleaseModuleService for Noop {
            async fn version(
                &self,
                _: tonic::Request<VersionReleaseRequest>,
            ) -> std::result::Result<tonic::Response<VersionReleaseResponse>, tonic::Status> {
                Err(tonic::Status::unimplemented("noop"))
            }
            async fn install_release(
                &self,
                _: tonic::Request<InstallReleaseRequest>,
            ) -> std::result::Result<tonic::Response<InstallReleaseResponse>, tonic::Status> {
                Err(tonic::Status::unimplemented("noop"))
            }
            async fn delete_release(
                &self,
                _: tonic::Request<DeleteReleaseRequest>,
            ) -> std::result::Result<tonic::Response<DeleteReleaseResponse>, tonic::Status> {
                Err(tonic::Status::unimplemented("noop"))
            }
            async fn rollback_release(
                &self,
                _: tonic::Request<RollbackReleaseRequest>,
            ) -> std::result::Result<tonic::Response<RollbackReleaseResponse>, tonic::Status> {
                Err(tonic::Status::unimplemented("noop"))
            }
            async fn upgrade_release(
                &self,
                _: tonic::Request<UpgradeReleaseRequest>,
            ) -> std::result::Result<tonic::Response<UpgradeReleaseResponse>, tonic::Status> {
                Err(tonic::Status::unimplemented("noop"))
            }
            async fn release_status(
                &self,
                _: tonic::Request<ReleaseStatusRequest>,
            ) -> std::result::Result<tonic::Response<ReleaseStatusResponse>, tonic::Status> {
                Err(tonic::Status::unimplemented("noop"))
            }
        }

        assert_eq!(
            <ReleaseModuleServiceServer<Noop> as NamedService>::NAME,
            "hapi.services.rudder.ReleaseModuleService"
        );
    }
}
