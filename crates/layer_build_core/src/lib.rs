//! Shared layer-build domain primitives.
//!
//! This crate owns the custom-resource contracts, package spec parsing,
//! artifact key derivation, and completion polling. It intentionally excludes
//! AWS SDK and Lambda runtime concerns.

pub mod completion;
pub mod contract;
pub mod error;
pub mod package_spec;
pub mod storage_keys;
