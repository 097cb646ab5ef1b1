//! Stage status and skip reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::StageName;

/// The execution status of a stage.
///
/// Within a run a stage only moves forward:
/// `Pending -> Running -> {Succeeded | Failed}` or `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is waiting to be resolved.
    #[default]
    Pending,
    /// Stage adapter is executing.
    Running,
    /// Stage completed successfully.
    Succeeded,
    /// Stage failed.
    Failed,
    /// Stage was not executed.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if moving to `next` is a legal in-run transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Skipped)
                | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}

/// Why a stage ended up `Skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The feature flag for the stage was off.
    FlagDisabled,
    /// An upstream stage did not succeed.
    DependencyUnmet {
        /// The upstream stage that blocked this one.
        dependency: StageName,
        /// Its status at the time.
        status: StageStatus,
    },
    /// None of several alternative upstream stages succeeded.
    NoAlternativeSucceeded {
        /// The alternatives that were considered.
        alternatives: Vec<StageName>,
    },
    /// The run was cancelled before the stage was reached.
    Cancelled {
        /// Cancellation reason.
        detail: String,
    },
}

impl SkipReason {
    /// Returns true if the skip was caused by the stage's own flag.
    #[must_use]
    pub fn is_flag_disabled(&self) -> bool {
        matches!(self, Self::FlagDisabled)
    }

    /// Returns true if the stage was never reached because the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlagDisabled => write!(f, "feature flag disabled"),
            Self::DependencyUnmet { dependency, status } => {
                write!(f, "dependency unmet: {dependency} is {status}")
            }
            Self::NoAlternativeSucceeded { alternatives } => {
                let names: Vec<&str> = alternatives.iter().map(|s| s.as_str()).collect();
                write!(f, "dependency unmet: none of [{}] succeeded", names.join(", "))
            }
            Self::Cancelled { detail } => write!(f, "run cancelled: {detail}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_stage_status_is_terminal() {
        assert!(StageStatus::Succeeded.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_transitions_only_move_forward() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Skipped));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Succeeded.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::Failed.can_transition_to(StageStatus::Succeeded));
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Succeeded));
    }

    #[test]
    fn test_skip_reason_serialize() {
        let reason = SkipReason::DependencyUnmet {
            dependency: StageName::DocumentRendering,
            status: StageStatus::Failed,
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "dependency_unmet");
        assert_eq!(json["dependency"], "document_rendering");
        assert_eq!(reason.to_string(), "dependency unmet: document_rendering is failed");
    }
}
