//! AWS-oriented adapters and handlers for the layer-build custom resource.
//!
//! This crate owns runtime integration details (Lambda handlers, the build
//! orchestrator, archive packaging, and storage adapters) on top of the
//! contracts in `layer_build_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod packaging;
pub mod registry;
pub mod telemetry;
