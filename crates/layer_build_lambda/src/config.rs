use std::str::FromStr;
use std::time::Duration;

use layer_build_core::completion::{CompletionPolicy, DEFAULT_MAX_COMPLETION_ATTEMPTS};
use layer_build_core::contract::DecodeDefaults;
use thiserror::Error;

use crate::adapters::resolver::PipResolver;
use crate::packaging::{ArchiveLimits, DEFAULT_MAX_UNZIPPED_BYTES, DEFAULT_MAX_ZIPPED_BYTES};

pub const DEFAULT_BUILD_TARGET: &str = "python3.13-arm64";
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_INSTALLER: &str = "pip";
/// Held back from the Lambda deadline so a timed-out build can still answer.
pub const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name}={value} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBuildConfig {
    pub default_bucket: Option<String>,
    /// Only shapes new keys. Delete recognizes artifacts by logical id and
    /// file name, so changing the prefix leaves earlier ones removable.
    pub key_prefix: String,
    pub build_target: String,
    pub build_timeout: Duration,
    pub installer: PipResolver,
    pub limits: ArchiveLimits,
    pub completion: CompletionPolicy,
    pub reuse_existing: bool,
}

impl LayerBuildConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let installer_line =
            value("LAYER_BUILD_PIP").unwrap_or_else(|| DEFAULT_INSTALLER.to_string());
        let installer = PipResolver::from_command_line(&installer_line).unwrap_or_default();

        let build_timeout = Duration::from_secs(parse_or(
            "LAYER_BUILD_TIMEOUT_SECS",
            value("LAYER_BUILD_TIMEOUT_SECS"),
            DEFAULT_BUILD_TIMEOUT.as_secs(),
        )?);
        if build_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: "LAYER_BUILD_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be a positive number of seconds".to_string(),
            });
        }

        Ok(Self {
            default_bucket: value("LAYER_BUILD_DEFAULT_BUCKET"),
            key_prefix: value("LAYER_BUILD_KEY_PREFIX")
                .map(|prefix| prefix.trim_matches('/').to_string())
                .unwrap_or_default(),
            build_target: value("LAYER_BUILD_TARGET")
                .unwrap_or_else(|| DEFAULT_BUILD_TARGET.to_string()),
            build_timeout,
            installer,
            limits: ArchiveLimits {
                max_unzipped_bytes: parse_or(
                    "LAYER_BUILD_MAX_UNZIPPED_BYTES",
                    value("LAYER_BUILD_MAX_UNZIPPED_BYTES"),
                    DEFAULT_MAX_UNZIPPED_BYTES,
                )?,
                max_zipped_bytes: parse_or(
                    "LAYER_BUILD_MAX_ZIPPED_BYTES",
                    value("LAYER_BUILD_MAX_ZIPPED_BYTES"),
                    DEFAULT_MAX_ZIPPED_BYTES,
                )?,
            },
            completion: CompletionPolicy {
                max_attempts: parse_or(
                    "LAYER_BUILD_MAX_COMPLETION_ATTEMPTS",
                    value("LAYER_BUILD_MAX_COMPLETION_ATTEMPTS"),
                    DEFAULT_MAX_COMPLETION_ATTEMPTS,
                )?,
                ..CompletionPolicy::default()
            },
            reuse_existing: parse_or(
                "LAYER_BUILD_REUSE_EXISTING",
                value("LAYER_BUILD_REUSE_EXISTING"),
                true,
            )?,
        })
    }

    pub fn decode_defaults(&self) -> DecodeDefaults {
        DecodeDefaults {
            default_bucket: self.default_bucket.clone(),
            default_build_target: self.build_target.clone(),
        }
    }

    /// Budget for one build: the configured timeout, clipped to what is left
    /// before the invocation deadline.
    pub fn build_budget(&self, deadline_epoch_ms: Option<u64>, now_epoch_ms: u64) -> Duration {
        match deadline_epoch_ms {
            Some(deadline) => effective_budget(self.build_timeout, deadline, now_epoch_ms),
            None => self.build_timeout,
        }
    }
}

pub fn effective_budget(
    configured: Duration,
    deadline_epoch_ms: u64,
    now_epoch_ms: u64,
) -> Duration {
    let until_deadline = Duration::from_millis(deadline_epoch_ms.saturating_sub(now_epoch_ms));
    configured.min(until_deadline.saturating_sub(DEADLINE_SAFETY_MARGIN))
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|error: T::Err| ConfigError::Invalid {
            name,
            reason: error.to_string(),
            value,
        }),
    }
}
