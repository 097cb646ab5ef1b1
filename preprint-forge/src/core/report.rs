//! Aggregated per-run reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{ArtifactKind, Project, SkipReason, StageName, StageStatus};

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage that was not skipped succeeded.
    Succeeded,
    /// Content was generated but some later stage failed or was cancelled.
    PartialSuccess,
    /// Content generation failed or was cancelled; nothing downstream could proceed.
    Failed,
}

impl RunOutcome {
    /// Classifies a set of terminal stage records.
    ///
    /// A stage skipped because the run was cancelled is unfinished work, not a
    /// satisfied stage: it makes the run a partial success, or a failure when
    /// content generation itself was never reached.
    pub fn classify<'a, I>(stages: I) -> Self
    where
        I: IntoIterator<Item = (StageName, StageStatus, Option<&'a SkipReason>)>,
    {
        let mut any_unfinished = false;
        for (stage, status, skip_reason) in stages {
            let cut_short = status == StageStatus::Skipped && skip_reason.is_some_and(SkipReason::is_cancelled);
            if status == StageStatus::Failed || cut_short {
                if stage == StageName::ContentGeneration {
                    return Self::Failed;
                }
                any_unfinished = true;
            }
        }
        if any_unfinished {
            Self::PartialSuccess
        } else {
            Self::Succeeded
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One stage's line in a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage.
    pub stage: StageName,
    /// Terminal status.
    pub status: StageStatus,
    /// Attempts made in the last execution round.
    pub attempts: u32,
    /// Last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Skip reason, if skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Structured result of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Project slug.
    pub slug: String,
    /// Project topic.
    pub topic: String,
    /// Overall classification.
    pub outcome: RunOutcome,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
    /// Per-stage lines in dependency order.
    pub stages: Vec<StageReport>,
    /// Artifact locations by kind.
    pub artifacts: BTreeMap<ArtifactKind, String>,
    /// Channels that carry the announcement.
    pub announced_channels: Vec<String>,
}

impl RunReport {
    /// Builds a report from a fully resolved project.
    #[must_use]
    pub fn from_project(project: &Project, cancelled: bool) -> Self {
        let stages: Vec<StageReport> = project
            .stages
            .values()
            .map(|s| StageReport {
                stage: s.name,
                status: s.status,
                attempts: s.attempts,
                last_error: s.last_error.clone(),
                skip_reason: s.skip_reason.clone(),
            })
            .collect();

        Self {
            slug: project.slug.clone(),
            topic: project.topic.clone(),
            outcome: RunOutcome::classify(stages.iter().map(|s| (s.stage, s.status, s.skip_reason.as_ref()))),
            cancelled,
            stages,
            artifacts: project
                .artifacts
                .iter()
                .map(|(kind, r)| (*kind, r.location.clone()))
                .collect(),
            announced_channels: project.announcements.keys().cloned().collect(),
        }
    }

    /// Returns the line for a stage.
    #[must_use]
    pub fn stage(&self, stage: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Returns the status of a stage.
    #[must_use]
    pub fn status(&self, stage: StageName) -> Option<StageStatus> {
        self.stage(stage).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageName::*;
    use StageStatus::*;

    fn cancelled() -> SkipReason {
        SkipReason::Cancelled {
            detail: "shutdown".to_string(),
        }
    }

    #[test]
    fn test_all_succeeded_or_skipped_is_success() {
        let flag = SkipReason::FlagDisabled;
        let outcome = RunOutcome::classify([
            (ContentGeneration, Succeeded, None),
            (DocumentRendering, Succeeded, None),
            (SitePublish, Skipped, Some(&flag)),
        ]);
        assert_eq!(outcome, RunOutcome::Succeeded);
    }

    #[test]
    fn test_downstream_failure_is_partial() {
        let blocked = SkipReason::DependencyUnmet {
            dependency: DocumentRendering,
            status: Failed,
        };
        let outcome = RunOutcome::classify([
            (ContentGeneration, Succeeded, None),
            (DocumentRendering, Failed, None),
            (BinaryCompilation, Skipped, Some(&blocked)),
            (RepositoryPublish, Succeeded, None),
        ]);
        assert_eq!(outcome, RunOutcome::PartialSuccess);
    }

    #[test]
    fn test_first_stage_failure_is_failed() {
        let outcome = RunOutcome::classify([(ContentGeneration, Failed, None), (DocumentRendering, Skipped, None)]);
        assert_eq!(outcome, RunOutcome::Failed);
    }

    #[test]
    fn test_cancelled_skips_are_not_success() {
        let reason = cancelled();
        let between_stages = RunOutcome::classify([
            (ContentGeneration, Succeeded, None),
            (DocumentRendering, Succeeded, None),
            (BinaryCompilation, Skipped, Some(&reason)),
        ]);
        assert_eq!(between_stages, RunOutcome::PartialSuccess);

        let before_any_work = RunOutcome::classify([
            (ContentGeneration, Skipped, Some(&reason)),
            (DocumentRendering, Skipped, Some(&reason)),
        ]);
        assert_eq!(before_any_work, RunOutcome::Failed);
    }

    #[test]
    fn test_outcome_serialize() {
        assert_eq!(
            serde_json::to_string(&RunOutcome::PartialSuccess).unwrap(),
            r#""partial_success""#
        );
    }
}
