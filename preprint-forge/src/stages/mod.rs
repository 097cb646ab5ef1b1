//! Stage adapters: the uniform boundary between the orchestrator and the
//! side-effecting collaborators.
//!
//! Every stage is driven through [`StageAdapter::execute`], whatever it wraps.
//! The typed collaborator ports live in [`ports`]; [`wiring`] wires each
//! port into a [`StageAdapter`].

pub mod ports;
pub mod wiring;

pub use wiring::{
    BinaryCompilationStage, ChannelAnnounceStage, ContentGenerationStage, DocumentRenderingStage,
    RepositoryPublishStage, SitePublishStage, StageAdapters,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{ArtifactKind, ChannelOutcome, ContentConstraints, Project};
use crate::errors::AdapterError;

/// Everything an adapter may read about the project it works on.
///
/// Built fresh from the persisted project before every attempt, so it always
/// reflects artifacts and announcements recorded so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    /// Project slug.
    pub slug: String,
    /// Project topic.
    pub topic: String,
    /// Authoring metadata.
    pub constraints: ContentConstraints,
    /// Accumulated artifact locations.
    pub artifacts: BTreeMap<ArtifactKind, String>,
    /// Channels that already carry the announcement.
    pub announced_channels: BTreeSet<String>,
    /// Per-project scratch directory.
    pub workspace: PathBuf,
    /// 1-based attempt number within the current round.
    pub attempt: u32,
    /// Channel outcomes reported while the attempt is still running.
    pub progress: ChannelProgress,
}

impl StageContext {
    /// Snapshots a project for one attempt.
    #[must_use]
    pub fn from_project(project: &Project, workspace_root: &Path, attempt: u32) -> Self {
        Self {
            slug: project.slug.clone(),
            topic: project.topic.clone(),
            constraints: project.constraints.clone(),
            artifacts: project
                .artifacts
                .iter()
                .map(|(kind, r)| (*kind, r.location.clone()))
                .collect(),
            announced_channels: project.announcements.keys().cloned().collect(),
            workspace: workspace_root.join(&project.slug),
            attempt,
            progress: ChannelProgress::new(),
        }
    }

    /// An artifact location, if recorded.
    #[must_use]
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&str> {
        self.artifacts.get(&kind).map(String::as_str)
    }

    /// An artifact location that the stage cannot do without.
    pub fn require(&self, kind: ArtifactKind) -> Result<&str, AdapterError> {
        self.artifact(kind)
            .ok_or_else(|| AdapterError::invalid_input(format!("missing {kind} artifact")))
    }
}

/// Outcomes an announcer reports one channel at a time.
///
/// The orchestrator keeps a handle to the same log, so posts that went out
/// before the attempt was cancelled are still recorded on the project.
#[derive(Debug, Clone, Default)]
pub struct ChannelProgress {
    outcomes: Arc<Mutex<Vec<ChannelOutcome>>>,
}

impl ChannelProgress {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the outcome of one channel.
    pub fn record(&self, outcome: ChannelOutcome) {
        self.outcomes.lock().push(outcome);
    }

    /// Every outcome reported so far.
    #[must_use]
    pub fn outcomes(&self) -> Vec<ChannelOutcome> {
        self.outcomes.lock().clone()
    }

    /// The successful posts reported so far.
    #[must_use]
    pub fn posted(&self) -> Vec<ChannelOutcome> {
        self.outcomes.lock().iter().filter(|o| o.is_success()).cloned().collect()
    }
}

impl PartialEq for ChannelProgress {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.outcomes, &other.outcomes) || self.outcomes() == other.outcomes()
    }
}

impl Eq for ChannelProgress {}

/// What a successful stage hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageYield {
    /// Location of the artifact the stage produced.
    pub artifact: Option<String>,
    /// Per-channel results (announcement stage only).
    pub channels: Vec<ChannelOutcome>,
}

impl StageYield {
    /// A produced artifact.
    #[must_use]
    pub fn artifact(location: impl Into<String>) -> Self {
        Self {
            artifact: Some(location.into()),
            channels: Vec::new(),
        }
    }

    /// Per-channel announcement results.
    #[must_use]
    pub fn channels(channels: Vec<ChannelOutcome>) -> Self {
        Self {
            artifact: None,
            channels,
        }
    }

    /// Nothing to record.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The uniform stage contract.
#[async_trait]
pub trait StageAdapter: Send + Sync + Debug {
    /// The stage this adapter executes.
    fn stage(&self) -> crate::core::StageName;

    /// Runs one attempt.
    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError>;
}
