//! The stage dependency graph as data.
//!
//! Skip propagation is computed from these rules rather than hard-coded at
//! each call site: the orchestrator asks [`StageGraph::check`] before running
//! a stage and [`StageGraph::downstream`] when forcing regeneration.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::{Project, SkipReason, StageName, StageStatus};

/// One dependency of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRule {
    /// The upstream stage must have succeeded.
    Required(StageName),
    /// The upstream stage must have succeeded, unless its own flag turned it off.
    IfEnabled(StageName),
    /// At least one of the upstream stages must have succeeded.
    AnyOf(Vec<StageName>),
}

impl DependencyRule {
    /// Stages the rule refers to.
    #[must_use]
    pub fn stages(&self) -> Vec<StageName> {
        match self {
            Self::Required(s) | Self::IfEnabled(s) => vec![*s],
            Self::AnyOf(alts) => alts.clone(),
        }
    }

    /// Evaluates the rule against a project's current stage records.
    pub fn evaluate(&self, project: &Project) -> Result<(), SkipReason> {
        match self {
            Self::Required(dep) => match project.status(*dep) {
                StageStatus::Succeeded => Ok(()),
                status => Err(SkipReason::DependencyUnmet {
                    dependency: *dep,
                    status,
                }),
            },
            Self::IfEnabled(dep) => {
                let state = project.stage(*dep);
                let status = state.map_or(StageStatus::Pending, |s| s.status);
                let flag_skipped = status == StageStatus::Skipped
                    && state
                        .and_then(|s| s.skip_reason.as_ref())
                        .is_some_and(SkipReason::is_flag_disabled);
                if status == StageStatus::Succeeded || flag_skipped {
                    Ok(())
                } else {
                    Err(SkipReason::DependencyUnmet {
                        dependency: *dep,
                        status,
                    })
                }
            }
            Self::AnyOf(alternatives) => {
                if alternatives
                    .iter()
                    .any(|s| project.status(*s) == StageStatus::Succeeded)
                {
                    Ok(())
                } else {
                    Err(SkipReason::NoAlternativeSucceeded {
                        alternatives: alternatives.clone(),
                    })
                }
            }
        }
    }
}

/// Dependency rules for every stage.
#[derive(Debug, Clone)]
pub struct StageGraph {
    rules: BTreeMap<StageName, Vec<DependencyRule>>,
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageGraph {
    /// The publishing pipeline.
    #[must_use]
    pub fn standard() -> Self {
        use DependencyRule::{AnyOf, IfEnabled, Required};
        use StageName::*;

        let rules = BTreeMap::from([
            (ContentGeneration, vec![]),
            (DocumentRendering, vec![Required(ContentGeneration)]),
            (BinaryCompilation, vec![Required(DocumentRendering)]),
            (RepositoryPublish, vec![AnyOf(vec![ContentGeneration, BinaryCompilation])]),
            (SitePublish, vec![Required(RepositoryPublish)]),
            (ChannelAnnounce, vec![Required(RepositoryPublish), IfEnabled(SitePublish)]),
        ]);
        Self { rules }
    }

    /// The rules of one stage.
    #[must_use]
    pub fn dependencies(&self, stage: StageName) -> &[DependencyRule] {
        self.rules.get(&stage).map_or(&[], Vec::as_slice)
    }

    /// Returns the first unmet rule as a skip reason.
    pub fn check(&self, stage: StageName, project: &Project) -> Result<(), SkipReason> {
        self.dependencies(stage)
            .iter()
            .try_for_each(|rule| rule.evaluate(project))
    }

    /// Stages that directly depend on `stage`.
    #[must_use]
    pub fn dependents(&self, stage: StageName) -> BTreeSet<StageName> {
        self.rules
            .iter()
            .filter(|(_, rules)| rules.iter().any(|r| r.stages().contains(&stage)))
            .map(|(name, _)| *name)
            .collect()
    }

    /// `stage` and everything transitively downstream of it.
    #[must_use]
    pub fn downstream(&self, stage: StageName) -> BTreeSet<StageName> {
        let mut seen = BTreeSet::from([stage]);
        let mut frontier = vec![stage];
        while let Some(current) = frontier.pop() {
            for next in self.dependents(current) {
                if seen.insert(next) {
                    frontier.push(next);
                }
            }
        }
        seen
    }

    /// Union of [`StageGraph::downstream`] over several stages.
    #[must_use]
    pub fn closure<I>(&self, stages: I) -> BTreeSet<StageName>
    where
        I: IntoIterator<Item = StageName>,
    {
        stages
            .into_iter()
            .flat_map(|s| self.downstream(s))
            .collect()
    }
}
