//! The project record: one unit of pipeline work and its per-stage progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ArtifactKind, ArtifactRef, ChannelOutcome, RunOutcome, SkipReason, StageName, StageStatus};
use crate::errors::{ForgeError, ForgeResult};

/// Which stages a run is allowed to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Generate the Markdown document.
    pub content_generation: bool,
    /// Render LaTeX from the document.
    pub document_rendering: bool,
    /// Compile the PDF.
    pub binary_compilation: bool,
    /// Publish to the hosting repository.
    pub repository_publish: bool,
    /// Enable the companion site.
    pub site_publish: bool,
    /// Announce on external channels.
    pub channel_announce: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            content_generation: true,
            document_rendering: true,
            binary_compilation: true,
            repository_publish: true,
            site_publish: false,
            channel_announce: false,
        }
    }
}

impl FeatureFlags {
    /// Every stage enabled.
    #[must_use]
    pub fn all() -> Self {
        Self {
            content_generation: true,
            document_rendering: true,
            binary_compilation: true,
            repository_publish: true,
            site_publish: true,
            channel_announce: true,
        }
    }

    /// Returns whether the stage is enabled.
    #[must_use]
    pub fn is_enabled(&self, stage: StageName) -> bool {
        match stage {
            StageName::ContentGeneration => self.content_generation,
            StageName::DocumentRendering => self.document_rendering,
            StageName::BinaryCompilation => self.binary_compilation,
            StageName::RepositoryPublish => self.repository_publish,
            StageName::SitePublish => self.site_publish,
            StageName::ChannelAnnounce => self.channel_announce,
        }
    }

    /// Returns a copy with one stage toggled.
    #[must_use]
    pub fn with(mut self, stage: StageName, enabled: bool) -> Self {
        let slot = match stage {
            StageName::ContentGeneration => &mut self.content_generation,
            StageName::DocumentRendering => &mut self.document_rendering,
            StageName::BinaryCompilation => &mut self.binary_compilation,
            StageName::RepositoryPublish => &mut self.repository_publish,
            StageName::SitePublish => &mut self.site_publish,
            StageName::ChannelAnnounce => &mut self.channel_announce,
        };
        *slot = enabled;
        self
    }
}

/// Authoring metadata and size bounds handed to the content generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConstraints {
    /// Author name.
    pub author: String,
    /// Author institution.
    pub institution: String,
    /// Author department.
    pub department: String,
    /// Contact email.
    pub email: String,
    /// Date printed on the paper; empty means "today".
    pub date: String,
    /// Lower word bound.
    pub min_words: u32,
    /// Upper word bound.
    pub max_words: u32,
}

impl Default for ContentConstraints {
    fn default() -> Self {
        Self {
            author: String::new(),
            institution: String::new(),
            department: String::new(),
            email: String::new(),
            date: String::new(),
            min_words: 2000,
            max_words: 5000,
        }
    }
}

impl ContentConstraints {
    /// The date to print, falling back to today in long form.
    #[must_use]
    pub fn display_date(&self) -> String {
        if self.date.trim().is_empty() {
            Utc::now().format("%B %d, %Y").to_string()
        } else {
            self.date.clone()
        }
    }
}

/// Per-stage execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    /// The stage.
    pub name: StageName,
    /// Current status.
    pub status: StageStatus,
    /// Attempts made in the most recent execution round.
    pub attempts: u32,
    /// Last failure description; cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Why the stage was skipped, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl StageState {
    /// Creates a pending stage record.
    #[must_use]
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            attempts: 0,
            last_error: None,
            skip_reason: None,
        }
    }

    fn transition(&mut self, next: StageStatus) -> ForgeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ForgeError::InvalidTransition {
                stage: self.name,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// `Pending -> Running`, starting a fresh execution round.
    pub fn begin(&mut self) -> ForgeResult<()> {
        self.transition(StageStatus::Running)?;
        self.attempts = 0;
        self.last_error = None;
        self.skip_reason = None;
        Ok(())
    }

    /// Counts one adapter invocation.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Records a failed attempt that will be retried.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// `Running -> Succeeded`.
    pub fn succeed(&mut self) -> ForgeResult<()> {
        self.transition(StageStatus::Succeeded)?;
        self.last_error = None;
        Ok(())
    }

    /// `Running -> Failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> ForgeResult<()> {
        self.transition(StageStatus::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// `Pending -> Skipped`.
    pub fn skip(&mut self, reason: SkipReason) -> ForgeResult<()> {
        self.transition(StageStatus::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }

    /// Puts a non-succeeded stage back to `Pending` between runs.
    ///
    /// Returns false (and leaves the record alone) for succeeded stages.
    pub fn rearm(&mut self) -> bool {
        if self.status == StageStatus::Succeeded {
            return false;
        }
        self.reset();
        true
    }

    /// Unconditionally resets the stage for forced regeneration.
    pub fn reset(&mut self) {
        self.status = StageStatus::Pending;
        self.attempts = 0;
        self.last_error = None;
        self.skip_reason = None;
    }

    /// Marks a stage left `Running` by a dead process as failed.
    pub fn interrupt(&mut self) -> bool {
        if self.status != StageStatus::Running {
            return false;
        }
        self.status = StageStatus::Failed;
        self.last_error = Some("interrupted: previous run ended while the stage was running".to_string());
        true
    }
}

/// The unit of work: a topic, its slug, and the pipeline progress for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique immutable identifier.
    pub slug: String,
    /// Original free-text topic.
    pub topic: String,
    /// Flags the project was last run with.
    #[serde(default)]
    pub flags: FeatureFlags,
    /// Metadata handed to the content generator.
    #[serde(default)]
    pub constraints: ContentConstraints,
    /// Stage records keyed in dependency order.
    pub stages: BTreeMap<StageName, StageState>,
    /// Produced artifacts, at most one per kind.
    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactKind, ArtifactRef>,
    /// Successful channel posts, keyed by channel name.
    #[serde(default)]
    pub announcements: BTreeMap<String, ChannelOutcome>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last persisted change.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Creates a project with every stage pending.
    #[must_use]
    pub fn new(
        slug: impl Into<String>,
        topic: impl Into<String>,
        flags: FeatureFlags,
        constraints: ContentConstraints,
    ) -> Self {
        let now = Utc::now();
        Self {
            slug: slug.into(),
            topic: topic.into(),
            flags,
            constraints,
            stages: StageName::ALL
                .into_iter()
                .map(|name| (name, StageState::new(name)))
                .collect(),
            artifacts: BTreeMap::new(),
            announcements: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the record for a stage.
    #[must_use]
    pub fn stage(&self, name: StageName) -> Option<&StageState> {
        self.stages.get(&name)
    }

    /// Returns the mutable record for a stage.
    pub fn stage_mut(&mut self, name: StageName) -> &mut StageState {
        self.stages.entry(name).or_insert_with(|| StageState::new(name))
    }

    /// Fills in records for stages missing from an older persisted project.
    pub fn ensure_stages(&mut self) {
        for name in StageName::ALL {
            self.stages.entry(name).or_insert_with(|| StageState::new(name));
        }
    }

    /// Returns the status of a stage.
    #[must_use]
    pub fn status(&self, name: StageName) -> StageStatus {
        self.stages.get(&name).map_or(StageStatus::Pending, |s| s.status)
    }

    /// Returns an artifact reference by kind.
    #[must_use]
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        self.artifacts.get(&kind)
    }

    /// Records the artifact a stage produced under that stage's own kind.
    ///
    /// Returns the kind written, or `None` for stages without an artifact.
    pub fn record_artifact(&mut self, stage: StageName, location: impl Into<String>) -> Option<ArtifactKind> {
        let kind = stage.produces()?;
        self.artifacts.insert(kind, ArtifactRef::new(location));
        Some(kind)
    }

    /// Drops the artifacts (and announcements) owned by the given stages.
    pub fn invalidate<I>(&mut self, stages: I)
    where
        I: IntoIterator<Item = StageName>,
    {
        for stage in stages {
            if let Some(kind) = stage.produces() {
                self.artifacts.remove(&kind);
            }
            if stage == StageName::ChannelAnnounce {
                self.announcements.clear();
            }
        }
    }

    /// Overall classification, or `None` while any stage is unresolved.
    #[must_use]
    pub fn outcome(&self) -> Option<RunOutcome> {
        if self.stages.values().any(|s| !s.status.is_terminal()) {
            return None;
        }
        Some(RunOutcome::classify(
            self.stages
                .values()
                .map(|s| (s.name, s.status, s.skip_reason.as_ref())),
        ))
    }

    /// Returns true if some stage was never reached because a run was cancelled.
    #[must_use]
    pub fn was_cut_short(&self) -> bool {
        self.stages
            .values()
            .any(|s| s.status == StageStatus::Skipped && s.skip_reason.as_ref().is_some_and(SkipReason::is_cancelled))
    }

    /// Bumps the modification time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn project() -> Project {
        Project::new("quantum-noise-240101", "quantum noise", FeatureFlags::all(), ContentConstraints::default())
    }

    #[test]
    fn test_new_project_has_every_stage_pending() {
        let p = project();
        assert_eq!(p.stages.len(), 6);
        assert!(p.stages.values().all(|s| s.status == StageStatus::Pending));
        assert_eq!(p.stages.keys().copied().collect::<Vec<_>>(), StageName::ALL.to_vec());
        assert!(p.outcome().is_none());
    }

    #[test]
    fn test_stage_lifecycle() {
        let mut state = StageState::new(StageName::ContentGeneration);
        state.begin().unwrap();
        state.record_attempt();
        state.record_error("timeout");
        state.record_attempt();
        state.succeed().unwrap();

        assert_eq!(state.status, StageStatus::Succeeded);
        assert_eq!(state.attempts, 2);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_succeeded_stage_cannot_restart() {
        let mut state = StageState::new(StageName::SitePublish);
        state.begin().unwrap();
        state.succeed().unwrap();

        let err = state.begin().unwrap_err();
        assert!(matches!(err, ForgeError::InvalidTransition { .. }));
        assert!(!state.rearm());
        assert_eq!(state.status, StageStatus::Succeeded);
    }

    #[test]
    fn test_rearm_failed_stage() {
        let mut state = StageState::new(StageName::BinaryCompilation);
        state.begin().unwrap();
        state.record_attempt();
        state.fail("pdflatex exited 1").unwrap();

        assert!(state.rearm());
        assert_eq!(state, StageState::new(StageName::BinaryCompilation));
    }

    #[test]
    fn test_interrupt_running_stage() {
        let mut state = StageState::new(StageName::RepositoryPublish);
        state.begin().unwrap();
        assert!(state.interrupt());
        assert_eq!(state.status, StageStatus::Failed);
        assert!(state.last_error.as_deref().unwrap().starts_with("interrupted"));
    }

    #[test]
    fn test_record_artifact_uses_stage_kind() {
        let mut p = project();
        let kind = p.record_artifact(StageName::BinaryCompilation, "/tmp/x.pdf");
        assert_eq!(kind, Some(ArtifactKind::Binary));
        assert_eq!(p.record_artifact(StageName::ChannelAnnounce, "ignored"), None);
        assert_eq!(p.artifacts.len(), 1);
    }

    #[test]
    fn test_invalidate_removes_only_owned_kinds() {
        let mut p = project();
        p.record_artifact(StageName::ContentGeneration, "doc.md");
        p.record_artifact(StageName::DocumentRendering, "doc.tex");
        p.record_artifact(StageName::BinaryCompilation, "doc.pdf");
        p.announcements
            .insert("twitter".to_string(), ChannelOutcome::posted("twitter", None));

        p.invalidate([StageName::BinaryCompilation, StageName::ChannelAnnounce]);

        assert!(p.artifact(ArtifactKind::Document).is_some());
        assert!(p.artifact(ArtifactKind::TypesetSource).is_some());
        assert!(p.artifact(ArtifactKind::Binary).is_none());
        assert!(p.announcements.is_empty());
    }

    #[test]
    fn test_flags_toggle() {
        let flags = FeatureFlags::default().with(StageName::SitePublish, true);
        assert!(flags.is_enabled(StageName::SitePublish));
        assert!(!flags.is_enabled(StageName::ChannelAnnounce));
    }

    #[test]
    fn test_project_roundtrip_keeps_stage_order() {
        let p = project();
        let json = serde_json::to_string(&p).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
