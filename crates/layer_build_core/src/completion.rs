use std::time::Duration;

use crate::contract::{CompletionResponse, OutputData};

pub const DEFAULT_MAX_COMPLETION_ATTEMPTS: u32 = 10;
pub const DEFAULT_COMPLETION_INTERVAL: Duration = Duration::from_secs(5);

/// Result of one completion check for an in-flight resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Success(OutputData),
    Failed(String),
}

impl CompletionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Wire form of this state. A failure has no `IsComplete` encoding and is
    /// handed back as the diagnostic instead.
    pub fn into_response(self) -> Result<CompletionResponse, String> {
        match self {
            Self::Pending => Ok(CompletionResponse {
                is_complete: false,
                data: OutputData::new(),
            }),
            Self::Success(data) => Ok(CompletionResponse {
                is_complete: true,
                data,
            }),
            Self::Failed(reason) => Err(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_COMPLETION_ATTEMPTS,
            interval: DEFAULT_COMPLETION_INTERVAL,
        }
    }
}

/// Calls `check` with 1-based attempt numbers until it reports a terminal
/// state, waiting `policy.interval` between attempts. Still pending after the
/// last attempt becomes a timeout failure.
pub fn poll_completion(
    policy: &CompletionPolicy,
    mut check: impl FnMut(u32) -> CompletionState,
    mut wait: impl FnMut(Duration),
) -> CompletionState {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let state = check(attempt);
        if state.is_terminal() {
            return state;
        }
        if attempt < max_attempts {
            wait(policy.interval);
        }
    }

    CompletionState::Failed(format!(
        "timed out waiting for completion after {max_attempts} attempts"
    ))
}
