//! Testing utilities for orchestrator runs.
//!
//! This module provides:
//! - [`ScriptedStage`], a replayable stage adapter
//! - [`ScriptedPipeline`], one scripted adapter per stage plus an
//!   orchestrator over in-memory stores

mod mocks;

pub use mocks::{ScriptedStage, Step};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{FeatureFlags, StageName};
use crate::events::EventSink;
use crate::identity::IdentityRegistry;
use crate::pipeline::{JitterStrategy, Orchestrator, RetryPolicy, StagePolicies};
use crate::stages::StageAdapters;
use crate::store::{InMemoryRunStateStore, RunStateStore};

/// A retry policy fast enough for tests: 1ms fixed backoff, three attempts.
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_base_delay_ms(1)
        .with_max_delay_ms(1)
        .with_jitter(JitterStrategy::None)
}

/// One [`ScriptedStage`] per stage.
#[derive(Debug, Clone)]
pub struct ScriptedPipeline {
    stages: BTreeMap<StageName, Arc<ScriptedStage>>,
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl ScriptedPipeline {
    /// Every stage succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            stages: StageName::ALL
                .into_iter()
                .map(|s| (s, Arc::new(ScriptedStage::succeeding(s))))
                .collect(),
        }
    }

    /// Replaces the script of one stage.
    #[must_use]
    pub fn with_stage(mut self, stage: ScriptedStage) -> Self {
        self.stages.insert(stage.stage_name(), Arc::new(stage));
        self
    }

    /// The scripted adapter of a stage.
    #[must_use]
    pub fn stage(&self, stage: StageName) -> Arc<ScriptedStage> {
        self.stages
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| Arc::new(ScriptedStage::succeeding(stage)))
    }

    /// Calls per stage.
    #[must_use]
    pub fn calls(&self) -> BTreeMap<StageName, usize> {
        self.stages.iter().map(|(s, a)| (*s, a.calls())).collect()
    }

    /// Calls across all stages.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.stages.values().map(|a| a.calls()).sum()
    }

    /// The adapters as a registry.
    #[must_use]
    pub fn adapters(&self) -> StageAdapters {
        self.stages
            .values()
            .fold(StageAdapters::new(), |acc, stage| acc.with_adapter(stage.clone()))
    }

    /// An orchestrator over fresh in-memory stores with every flag on.
    #[must_use]
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(
            Arc::new(IdentityRegistry::in_memory()),
            Arc::new(InMemoryRunStateStore::new()),
        )
    }

    /// An orchestrator over the given stores.
    #[must_use]
    pub fn orchestrator_with(&self, registry: Arc<IdentityRegistry>, store: Arc<dyn RunStateStore>) -> Orchestrator {
        Orchestrator::new(registry, store, self.adapters())
            .with_policies(StagePolicies::uniform(fast_retry()))
            .with_default_flags(FeatureFlags::all())
            .with_workspace_root(std::env::temp_dir().join("preprint-forge-tests"))
    }

    /// Same as [`ScriptedPipeline::orchestrator`] with an event sink attached.
    #[must_use]
    pub fn orchestrator_with_events(&self, events: Arc<dyn EventSink>) -> Orchestrator {
        self.orchestrator().with_event_sink(events)
    }
}
