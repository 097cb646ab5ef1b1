//! Run lifecycle events.
//!
//! The orchestrator reports every stage transition to an [`EventSink`].
//! Events carry the slug so a sink shared by concurrent runs can tell them
//! apart.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::Serialize;

use crate::core::{RunOutcome, StageName};

/// A lifecycle event emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ForgeEvent {
    /// A run began.
    #[serde(rename = "run.started")]
    RunStarted {
        /// Project slug.
        slug: String,
        /// Project topic.
        topic: String,
        /// Whether the project was created by this run.
        created: bool,
    },
    /// A stage moved to `Running`.
    #[serde(rename = "stage.started")]
    StageStarted {
        /// Project slug.
        slug: String,
        /// The stage.
        stage: StageName,
    },
    /// A transient failure will be retried after a delay.
    #[serde(rename = "stage.retrying")]
    StageRetrying {
        /// Project slug.
        slug: String,
        /// The stage.
        stage: StageName,
        /// The attempt that failed.
        attempt: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
        /// The failure.
        error: String,
    },
    /// A stage succeeded.
    #[serde(rename = "stage.succeeded")]
    StageSucceeded {
        /// Project slug.
        slug: String,
        /// The stage.
        stage: StageName,
        /// Attempts used.
        attempts: u32,
        /// Recorded artifact location, if the stage produces one.
        artifact: Option<String>,
    },
    /// A stage failed terminally.
    #[serde(rename = "stage.failed")]
    StageFailed {
        /// Project slug.
        slug: String,
        /// The stage.
        stage: StageName,
        /// Attempts used.
        attempts: u32,
        /// The last failure.
        error: String,
    },
    /// A stage was skipped.
    #[serde(rename = "stage.skipped")]
    StageSkipped {
        /// Project slug.
        slug: String,
        /// The stage.
        stage: StageName,
        /// Why.
        reason: String,
    },
    /// A run finished with a report.
    #[serde(rename = "run.completed")]
    RunCompleted {
        /// Project slug.
        slug: String,
        /// Overall classification.
        outcome: RunOutcome,
        /// Whether the run was cancelled.
        cancelled: bool,
    },
}

impl ForgeEvent {
    /// The dotted event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageRetrying { .. } => "stage.retrying",
            Self::StageSucceeded { .. } => "stage.succeeded",
            Self::StageFailed { .. } => "stage.failed",
            Self::StageSkipped { .. } => "stage.skipped",
            Self::RunCompleted { .. } => "run.completed",
        }
    }

    /// The slug the event belongs to.
    #[must_use]
    pub fn slug(&self) -> &str {
        match self {
            Self::RunStarted { slug, .. }
            | Self::StageStarted { slug, .. }
            | Self::StageRetrying { slug, .. }
            | Self::StageSucceeded { slug, .. }
            | Self::StageFailed { slug, .. }
            | Self::StageSkipped { slug, .. }
            | Self::RunCompleted { slug, .. } => slug,
        }
    }

    /// The stage the event concerns, if any.
    #[must_use]
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageRetrying { stage, .. }
            | Self::StageSucceeded { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::StageSkipped { stage, .. } => Some(*stage),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }

    /// JSON form, including the `type` tag.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
