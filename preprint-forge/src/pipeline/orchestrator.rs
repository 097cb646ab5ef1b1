//! The pipeline orchestrator.
//!
//! Walks the stages of one project strictly in dependency order, applying the
//! per-stage retry policy and persisting the project after every transition.
//! Adapter failures are recorded on the stage and never abort the run; only
//! persistence and malformed-input errors do.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::graph::StageGraph;
use super::request::{RunRequest, RunTarget};
use super::retry::{RetryDecision, RetryPolicy, StagePolicies};
use crate::cancellation::CancellationToken;
use crate::core::{ContentConstraints, FeatureFlags, Project, RunReport, SkipReason, StageName, StageStatus};
use crate::errors::{AdapterError, ErrorCategory, ErrorClass, ForgeError, ForgeResult};
use crate::events::{EventSink, ForgeEvent, NoOpEventSink};
use crate::identity::{validate_slug, IdentityRegistry, NameRecord};
use crate::stages::{ChannelProgress, StageAdapters, StageContext, StageYield};
use crate::store::{ProjectFilter, ProjectSummary, RunStateStore};

/// Exclusive claim on a slug for the duration of a run.
struct RunLease {
    leases: Arc<DashMap<String, ()>>,
    slug: String,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.leases.remove(&self.slug);
    }
}

/// How a stage's execution round ended.
enum StageEnd {
    Succeeded,
    Failed,
    Cancelled,
}

/// Coordinates identity, run state and stage adapters.
pub struct Orchestrator {
    registry: Arc<IdentityRegistry>,
    store: Arc<dyn RunStateStore>,
    adapters: StageAdapters,
    graph: StageGraph,
    policies: StagePolicies,
    events: Arc<dyn EventSink>,
    workspace_root: PathBuf,
    default_flags: FeatureFlags,
    default_constraints: ContentConstraints,
    leases: Arc<DashMap<String, ()>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.adapters.registered())
            .field("workspace_root", &self.workspace_root)
            .field("active_runs", &self.leases.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default policies and no event sink.
    #[must_use]
    pub fn new(registry: Arc<IdentityRegistry>, store: Arc<dyn RunStateStore>, adapters: StageAdapters) -> Self {
        Self {
            registry,
            store,
            adapters,
            graph: StageGraph::standard(),
            policies: StagePolicies::default(),
            events: Arc::new(NoOpEventSink),
            workspace_root: PathBuf::from("workspace"),
            default_flags: FeatureFlags::default(),
            default_constraints: ContentConstraints::default(),
            leases: Arc::new(DashMap::new()),
        }
    }

    /// Sets the retry policies.
    #[must_use]
    pub fn with_policies(mut self, policies: StagePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the directory holding per-project workspaces.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Flags used for new projects when the request carries none.
    #[must_use]
    pub fn with_default_flags(mut self, flags: FeatureFlags) -> Self {
        self.default_flags = flags;
        self
    }

    /// Metadata used for new projects when the request carries none.
    #[must_use]
    pub fn with_default_constraints(mut self, constraints: ContentConstraints) -> Self {
        self.default_constraints = constraints;
        self
    }

    /// The identity registry.
    #[must_use]
    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// The workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Runs the pipeline to completion.
    pub async fn run(&self, request: RunRequest) -> ForgeResult<RunReport> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Runs the pipeline, stopping early once `cancel` fires.
    ///
    /// A cancelled run still returns a report: the stage in flight ends
    /// `Failed` and every stage not yet reached ends `Skipped`.
    pub async fn run_with_cancel(&self, request: RunRequest, cancel: &CancellationToken) -> ForgeResult<RunReport> {
        let (mut project, _lease, created) = self.open(&request).await?;
        self.prepare(&mut project, &request).await?;

        info!(slug = %project.slug, created, "Run started");
        self.emit(ForgeEvent::RunStarted {
            slug: project.slug.clone(),
            topic: project.topic.clone(),
            created,
        })
        .await;

        let mut cancelled = false;
        for stage in StageName::ALL {
            if project.status(stage) == StageStatus::Succeeded {
                debug!(slug = %project.slug, stage = %stage, "Stage already succeeded");
                continue;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                let detail = cancel.reason().unwrap_or_default();
                self.skip(&mut project, stage, SkipReason::Cancelled { detail }).await?;
                continue;
            }
            if !project.flags.is_enabled(stage) {
                self.skip(&mut project, stage, SkipReason::FlagDisabled).await?;
                continue;
            }
            if let Err(reason) = self.graph.check(stage, &project) {
                self.skip(&mut project, stage, reason).await?;
                continue;
            }
            if let StageEnd::Cancelled = self.execute_stage(&mut project, stage, cancel).await? {
                cancelled = true;
            }
        }

        let report = RunReport::from_project(&project, cancelled);
        info!(slug = %report.slug, outcome = %report.outcome, cancelled, "Run completed");
        self.emit(ForgeEvent::RunCompleted {
            slug: report.slug.clone(),
            outcome: report.outcome,
            cancelled,
        })
        .await;
        Ok(report)
    }

    /// Loads the project for a report without running anything.
    pub async fn report(&self, slug: &str) -> ForgeResult<RunReport> {
        Ok(RunReport::from_project(&self.project(slug).await?, false))
    }

    /// Loads a stored project.
    pub async fn project(&self, slug: &str) -> ForgeResult<Project> {
        validate_slug(slug)?;
        self.store.load(slug).await
    }

    /// Lists stored projects.
    pub async fn list(&self, filter: &ProjectFilter) -> ForgeResult<Vec<ProjectSummary>> {
        self.store.list(filter).await
    }

    /// Deletes a project's run state and releases its name.
    ///
    /// The slug stays reserved forever.
    pub async fn delete(&self, slug: &str) -> ForgeResult<()> {
        validate_slug(slug)?;
        let _lease = self.acquire(slug)?;

        let removed = match self.store.delete(slug).await {
            Ok(()) => true,
            Err(ForgeError::ProjectNotFound { .. }) => false,
            Err(e) => return Err(e),
        };
        let name = slug.to_string();
        match self.with_registry(move |registry| registry.release(&name)).await {
            Ok(_) => {}
            Err(ForgeError::ProjectNotFound { .. }) if removed => {}
            Err(e) => return Err(e),
        }
        info!(slug, "Deleted project");
        Ok(())
    }

    /// Returns the newest live name reserved for the same topic.
    pub async fn lookup(&self, topic: &str) -> ForgeResult<Option<NameRecord>> {
        let topic = topic.to_string();
        self.with_registry(move |registry| registry.lookup(&topic)).await
    }

    /// Runs a registry call on the blocking pool; ledgers touch the disk.
    async fn with_registry<T, F>(&self, call: F) -> ForgeResult<T>
    where
        F: FnOnce(&IdentityRegistry) -> ForgeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || call(&registry))
            .await
            .map_err(|e| ForgeError::Io(std::io::Error::other(e)))?
    }

    fn acquire(&self, slug: &str) -> ForgeResult<RunLease> {
        match self.leases.entry(slug.to_string()) {
            Entry::Occupied(_) => Err(ForgeError::RunInProgress {
                slug: slug.to_string(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(RunLease {
                    leases: self.leases.clone(),
                    slug: slug.to_string(),
                })
            }
        }
    }

    async fn open(&self, request: &RunRequest) -> ForgeResult<(Project, RunLease, bool)> {
        match &request.target {
            RunTarget::New { topic, slug } => {
                let (topic_owned, explicit) = (topic.clone(), slug.clone());
                let slug = self
                    .with_registry(move |registry| registry.reserve(&topic_owned, explicit.as_deref()))
                    .await?;
                let lease = self.acquire(&slug)?;
                let project = Project::new(
                    slug,
                    topic.trim(),
                    request.flags.unwrap_or(self.default_flags),
                    request
                        .constraints
                        .clone()
                        .unwrap_or_else(|| self.default_constraints.clone()),
                );
                Ok((project, lease, true))
            }
            RunTarget::Existing { slug } => {
                validate_slug(slug)?;
                let lease = self.acquire(slug)?;
                let mut project = self.store.load(slug).await?;
                if let Some(flags) = request.flags {
                    project.flags = flags;
                }
                if let Some(constraints) = &request.constraints {
                    project.constraints = constraints.clone();
                }
                Ok((project, lease, false))
            }
        }
    }

    /// Normalises stage records before the walk and persists the result.
    async fn prepare(&self, project: &mut Project, request: &RunRequest) -> ForgeResult<()> {
        project.ensure_stages();

        for state in project.stages.values_mut() {
            if state.interrupt() {
                warn!(slug = %project.slug, stage = %state.name, "Stage was left running; marked failed");
            }
        }

        let forced: BTreeSet<StageName> = self.graph.closure(request.force.iter().copied());
        if !forced.is_empty() {
            info!(slug = %project.slug, stages = ?forced, "Forcing regeneration");
            project.invalidate(forced.iter().copied());
        }
        for stage in StageName::ALL {
            let state = project.stage_mut(stage);
            if forced.contains(&stage) {
                state.reset();
            } else {
                state.rearm();
            }
        }

        self.persist(project).await
    }

    async fn persist(&self, project: &mut Project) -> ForgeResult<()> {
        project.touch();
        self.store.save(project).await
    }

    async fn emit(&self, event: ForgeEvent) {
        self.events.emit(&event).await;
    }

    async fn skip(&self, project: &mut Project, stage: StageName, reason: SkipReason) -> ForgeResult<()> {
        info!(slug = %project.slug, stage = %stage, reason = %reason, "Stage skipped");
        let message = reason.to_string();
        project.stage_mut(stage).skip(reason)?;
        self.persist(project).await?;
        self.emit(ForgeEvent::StageSkipped {
            slug: project.slug.clone(),
            stage,
            reason: message,
        })
        .await;
        Ok(())
    }

    async fn execute_stage(
        &self,
        project: &mut Project,
        stage: StageName,
        cancel: &CancellationToken,
    ) -> ForgeResult<StageEnd> {
        let policy = self.policies.for_stage(stage).clone();
        project.stage_mut(stage).begin()?;
        self.persist(project).await?;
        info!(slug = %project.slug, stage = %stage, "Stage started");
        self.emit(ForgeEvent::StageStarted {
            slug: project.slug.clone(),
            stage,
        })
        .await;

        let Some(adapter) = self.adapters.get(stage) else {
            let error = AdapterError::not_found(format!("no adapter registered for {stage}"));
            return self.fail(project, stage, &error).await.map(|()| StageEnd::Failed);
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            project.stage_mut(stage).record_attempt();
            let ctx = StageContext::from_project(project, &self.workspace_root, attempt);
            debug!(slug = %project.slug, stage = %stage, attempt, "Invoking adapter");

            let progress = ctx.progress.clone();

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(AdapterError::cancelled(cancel.reason().unwrap_or_default())),
                result = adapter.execute(&ctx) => result,
            };
            if result.is_err() {
                Self::keep_reported_posts(project, &progress);
            }
            let result = result.and_then(|output| self.settle(project, stage, output, &policy));

            let error = match result {
                Ok(output) => {
                    self.succeed(project, stage, output).await?;
                    return Ok(StageEnd::Succeeded);
                }
                Err(error) => error,
            };

            if error.category == ErrorCategory::Cancelled {
                self.fail(project, stage, &error).await?;
                return Ok(StageEnd::Cancelled);
            }

            match policy.decide(attempt, &error) {
                RetryDecision::Retry(delay) => {
                    project.stage_mut(stage).record_error(error.to_string());
                    self.persist(project).await?;
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    warn!(slug = %project.slug, stage = %stage, attempt, delay_ms, error = %error, "Transient failure, retrying");
                    self.emit(ForgeEvent::StageRetrying {
                        slug: project.slug.clone(),
                        stage,
                        attempt,
                        delay_ms,
                        error: error.to_string(),
                    })
                    .await;

                    let interrupted = tokio::select! {
                        biased;
                        () = cancel.cancelled() => true,
                        () = tokio::time::sleep(delay) => false,
                    };
                    if interrupted {
                        let error = AdapterError::cancelled(cancel.reason().unwrap_or_default());
                        self.fail(project, stage, &error).await?;
                        return Ok(StageEnd::Cancelled);
                    }
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    self.fail(project, stage, &error).await?;
                    return Ok(StageEnd::Failed);
                }
            }
        }
    }

    /// Records posts an interrupted or failed attempt reported before it ended.
    fn keep_reported_posts(project: &mut Project, progress: &ChannelProgress) {
        for outcome in progress.posted() {
            if !project.announcements.contains_key(&outcome.channel) {
                info!(slug = %project.slug, channel = %outcome.channel, "Announced before the attempt ended");
                project.announcements.insert(outcome.channel.clone(), outcome);
            }
        }
    }

    /// Checks an adapter's output and folds channel outcomes into the project.
    fn settle(
        &self,
        project: &mut Project,
        stage: StageName,
        output: StageYield,
        policy: &RetryPolicy,
    ) -> Result<StageYield, AdapterError> {
        if stage != StageName::ChannelAnnounce {
            if stage.produces().is_some() && output.artifact.is_none() {
                return Err(AdapterError::invalid_input(format!("{stage} produced no artifact")));
            }
            return Ok(output);
        }

        let mut failures = Vec::new();
        for outcome in output.channels {
            match outcome.error.clone() {
                None => {
                    info!(slug = %project.slug, channel = %outcome.channel, "Announced");
                    project.announcements.insert(outcome.channel.clone(), outcome);
                }
                Some(error) => {
                    warn!(slug = %project.slug, channel = %outcome.channel, error = %error, "Channel post failed");
                    failures.push((outcome.channel, error));
                }
            }
        }

        if !project.announcements.is_empty() {
            return Ok(StageYield::empty());
        }
        let representative = failures
            .iter()
            .find(|(_, e)| policy.classify(e) == ErrorClass::Transient)
            .or_else(|| failures.first());
        let Some((_, representative)) = representative else {
            return Err(AdapterError::invalid_input("no announcement channels configured"));
        };
        let summary: Vec<String> = failures.iter().map(|(c, e)| format!("{c}: {e}")).collect();
        Err(AdapterError::new(
            representative.category,
            format!("every channel failed ({})", summary.join("; ")),
        ))
    }

    async fn succeed(&self, project: &mut Project, stage: StageName, output: StageYield) -> ForgeResult<()> {
        if let Some(location) = &output.artifact {
            project.record_artifact(stage, location.clone());
        }
        project.stage_mut(stage).succeed()?;
        self.persist(project).await?;

        let attempts = project.stage(stage).map_or(0, |s| s.attempts);
        info!(slug = %project.slug, stage = %stage, attempts, "Stage succeeded");
        self.emit(ForgeEvent::StageSucceeded {
            slug: project.slug.clone(),
            stage,
            attempts,
            artifact: output.artifact,
        })
        .await;
        Ok(())
    }

    async fn fail(&self, project: &mut Project, stage: StageName, error: &AdapterError) -> ForgeResult<()> {
        project.stage_mut(stage).fail(error.to_string())?;
        self.persist(project).await?;

        let attempts = project.stage(stage).map_or(0, |s| s.attempts);
        warn!(slug = %project.slug, stage = %stage, attempts, error = %error, "Stage failed");
        self.emit(ForgeEvent::StageFailed {
            slug: project.slug.clone(),
            stage,
            attempts,
            error: error.to_string(),
        })
        .await;
        Ok(())
    }
}
