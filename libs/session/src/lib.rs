//! Ephemeral conversation state keyed by user id.
//!
//! Each user holds at most one in-flight interaction. Entries expire after a
//! fixed TTL that is re-armed on every write; an expired entry reads as absent.
mod memory;

use std::time::Duration;

use hops_core::Action;

pub use memory::StateStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Position of a user inside the multi-step flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    AwaitingParameter,
    AwaitingConfirmation { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub action: Action,
    pub step: Step,
}

impl ConversationState {
    pub fn awaiting_parameter(action: Action) -> Self {
        Self {
            action,
            step: Step::AwaitingParameter,
        }
    }

    pub fn awaiting_confirmation(action: Action, target: impl Into<String>) -> Self {
        Self {
            action,
            step: Step::AwaitingConfirmation {
                target: target.into(),
            },
        }
    }

    /// Target awaiting confirmation, if the flow reached that step.
    pub fn pending_target(&self) -> Option<&str> {
        match &self.step {
            Step::AwaitingConfirmation { target } => Some(target),
            Step::AwaitingParameter => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub sweep_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl SessionConfig {
    pub fn from_secs(ttl_secs: u64, sweep_interval_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs.max(1)),
            sweep_interval: (sweep_interval_secs > 0)
                .then(|| Duration::from_secs(sweep_interval_secs)),
        }
    }
}
