//! Scripted stage adapters for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{ChannelOutcome, StageName};
use crate::errors::AdapterError;
use crate::stages::{StageAdapter, StageContext, StageYield};

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Succeed with the stage's default output.
    Succeed,
    /// Succeed with a specific output.
    Yield(StageYield),
    /// Fail with an error.
    Fail(AdapterError),
}

/// A stage adapter that replays a script and records every call.
///
/// Once the script is exhausted the fallback step repeats forever.
#[derive(Debug)]
pub struct ScriptedStage {
    stage: StageName,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Option<Duration>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<StageContext>>,
}

impl ScriptedStage {
    /// A stage that always succeeds.
    #[must_use]
    pub fn succeeding(stage: StageName) -> Self {
        Self {
            stage,
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Succeed,
            delay: None,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// A stage that always fails with `error`.
    #[must_use]
    pub fn failing(stage: StageName, error: AdapterError) -> Self {
        Self {
            fallback: Step::Fail(error),
            ..Self::succeeding(stage)
        }
    }

    /// Queues a failure before the fallback.
    #[must_use]
    pub fn then_fail(self, error: AdapterError) -> Self {
        self.script.lock().push_back(Step::Fail(error));
        self
    }

    /// Queues a default success before the fallback.
    #[must_use]
    pub fn then_succeed(self) -> Self {
        self.script.lock().push_back(Step::Succeed);
        self
    }

    /// Queues a specific output before the fallback.
    #[must_use]
    pub fn then_yield(self, output: StageYield) -> Self {
        self.script.lock().push_back(Step::Yield(output));
        self
    }

    /// Replaces the step used once the script runs out.
    #[must_use]
    pub fn with_fallback(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The stage this adapter answers for.
    #[must_use]
    pub fn stage_name(&self) -> StageName {
        self.stage
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Contexts seen, in call order.
    #[must_use]
    pub fn contexts(&self) -> Vec<StageContext> {
        self.contexts.lock().clone()
    }

    /// The default successful output for a stage.
    #[must_use]
    pub fn default_yield(stage: StageName, ctx: &StageContext) -> StageYield {
        let file = |ext: &str| format!("{}/{}.{ext}", ctx.workspace.display(), ctx.slug);
        match stage {
            StageName::ContentGeneration => StageYield::artifact(file("md")),
            StageName::DocumentRendering => StageYield::artifact(file("tex")),
            StageName::BinaryCompilation => StageYield::artifact(file("pdf")),
            StageName::RepositoryPublish => StageYield::artifact(format!("https://github.com/test/{}", ctx.slug)),
            StageName::SitePublish => StageYield::artifact(format!("https://test.github.io/{}", ctx.slug)),
            StageName::ChannelAnnounce => StageYield::channels(vec![ChannelOutcome::posted("scripted", None)]),
        }
    }
}

#[async_trait]
impl StageAdapter for ScriptedStage {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(ctx.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Succeed => Ok(Self::default_yield(self.stage, ctx)),
            Step::Yield(output) => Ok(output),
            Step::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentConstraints, FeatureFlags, Project};
    use std::path::Path;

    fn ctx() -> StageContext {
        let project = Project::new("a", "a", FeatureFlags::default(), ContentConstraints::default());
        StageContext::from_project(&project, Path::new("/w"), 1)
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let stage = ScriptedStage::succeeding(StageName::ContentGeneration)
            .then_fail(AdapterError::timeout("slow"));

        assert!(stage.execute(&ctx()).await.is_err());
        let out = stage.execute(&ctx()).await.unwrap();
        assert_eq!(out.artifact.as_deref(), Some("/w/a/a.md"));
        assert_eq!(stage.calls(), 2);
        assert_eq!(stage.contexts().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let stage = ScriptedStage::failing(StageName::SitePublish, AdapterError::unauthorized("no"));
        for _ in 0..3 {
            assert_eq!(
                stage.execute(&ctx()).await.unwrap_err(),
                AdapterError::unauthorized("no")
            );
        }
    }
}
