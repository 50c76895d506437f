//! rudder-federation - Helm release module for cluster federations
//!
//! Tiller hands every release to a release module over gRPC. This module
//! spreads a release across a federation: part of the manifest is created in
//! the federation control plane, the rest directly in every member cluster.
//!
//! # Architecture
//!
//! ```text
//! gRPC ──▶ LifecycleService ──▶ classifier (split) ──▶ FleetResolver ──▶ fan-out
//!                                                                       │
//!                                         control plane ◀───────────────┤
//!                                         member 1..N   ◀───────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manifest`] - Manifest classification and install-time substitution
//! - [`federation`] - Credentials, member registry and fleet resolution
//! - [`apply`] - Per-cluster create/update/get/delete
//! - [`fanout`] - Concurrent dispatch and result aggregation
//! - [`lifecycle`] - Install, upgrade, rollback, delete and status
//! - [`grpc`] - `ReleaseModuleService` implementation
//! - [`config`] - Command-line configuration

#![deny(missing_docs)]

pub mod apply;
pub mod config;
pub mod fanout;
pub mod federation;
pub mod grpc;
pub mod lifecycle;
pub mod manifest;

pub use rudder_common::{Error, Result};
