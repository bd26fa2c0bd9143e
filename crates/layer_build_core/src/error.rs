use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package_spec::PackageSpecError;

/// Classification carried on failed responses so callers can pick retry vs. fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildErrorKind {
    Resolution,
    StorageWrite,
    Packaging,
    Timeout,
    InvalidRequest,
}

impl BuildErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::StorageWrite => "storage_write",
            Self::Packaging => "packaging",
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid_request",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::StorageWrite | Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Package or version unavailable, incompatible, or the installer failed.
    #[error("package resolution failed: {0}")]
    Resolution(String),

    /// Artifact store unreachable, permission denied, or quota exceeded.
    #[error("artifact store write failed: {0}")]
    StorageWrite(String),

    /// Archive exceeds runtime size limits or could not be produced.
    #[error("packaging failed: {0}")]
    Packaging(String),

    #[error("build exceeded its {}s time budget during {stage}", .budget.as_secs_f64())]
    Timeout { stage: String, budget: Duration },
}

impl BuildError {
    pub fn timeout(stage: impl Into<String>, budget: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            budget,
        }
    }

    pub fn kind(&self) -> BuildErrorKind {
        match self {
            Self::Resolution(_) => BuildErrorKind::Resolution,
            Self::StorageWrite(_) => BuildErrorKind::StorageWrite,
            Self::Packaging(_) => BuildErrorKind::Packaging,
            Self::Timeout { .. } => BuildErrorKind::Timeout,
        }
    }
}

/// Malformed provisioning input, rejected at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventDecodeError {
    #[error("malformed provisioning event: {0}")]
    Malformed(String),
    #[error("unsupported RequestType '{0}'")]
    UnknownRequestType(String),
    #[error("LogicalResourceId {0}")]
    InvalidLogicalId(&'static str),
    #[error("{0} request requires a PhysicalResourceId")]
    MissingPhysicalId(&'static str),
    #[error("ResourceProperties.{0} must be a non-empty string")]
    MissingProperty(&'static str),
    #[error("ResourceProperties.PackageName is invalid: {0}")]
    InvalidPackageSpec(#[from] PackageSpecError),
}

/// Failure to remove an artifact on Delete. Logged, never propagated as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to delete artifact '{key}' from '{container}': {message}")]
pub struct DeletionError {
    pub container: String,
    pub key: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_build_errors() {
        assert_eq!(
            BuildError::Resolution("no such package".into()).kind(),
            BuildErrorKind::Resolution
        );
        assert_eq!(
            BuildError::timeout("resolution", Duration::from_secs(5)).kind(),
            BuildErrorKind::Timeout
        );
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(BuildErrorKind::Timeout.is_retryable());
        assert!(BuildErrorKind::StorageWrite.is_retryable());
        assert!(!BuildErrorKind::Resolution.is_retryable());
        assert!(!BuildErrorKind::Packaging.is_retryable());
        assert!(!BuildErrorKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn timeout_message_names_stage_and_budget() {
        let error = BuildError::timeout("upload", Duration::from_millis(1500));
        assert_eq!(
            error.to_string(),
            "build exceeded its 1.5s time budget during upload"
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let value =
            serde_json::to_value(BuildErrorKind::StorageWrite).expect("kind should serialize");
        assert_eq!(value, serde_json::json!("storage_write"));
    }
}
