//! Durable run state.
//!
//! The store exclusively owns the persisted copy of each [`Project`]. `save`
//! is the only mutation path and is all-or-nothing per call.

mod file;
mod memory;

pub use file::FileRunStateStore;
pub use memory::InMemoryRunStateStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::{Project, RunOutcome};
use crate::errors::{ForgeError, ForgeResult};

/// Overall status of a stored project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Some stage has not reached a terminal status, or the last run was
    /// cancelled before reaching it.
    Incomplete,
    /// Last run succeeded.
    Succeeded,
    /// Last run partially succeeded.
    PartialSuccess,
    /// Content generation failed.
    Failed,
}

impl ProjectStatus {
    /// Derives the status of a project from its stage records.
    #[must_use]
    pub fn of(project: &Project) -> Self {
        if project.was_cut_short() {
            return Self::Incomplete;
        }
        match project.outcome() {
            None => Self::Incomplete,
            Some(RunOutcome::Succeeded) => Self::Succeeded,
            Some(RunOutcome::PartialSuccess) => Self::PartialSuccess,
            Some(RunOutcome::Failed) => Self::Failed,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "incomplete" => Ok(Self::Incomplete),
            "succeeded" | "success" => Ok(Self::Succeeded),
            "partial" | "partial_success" => Ok(Self::PartialSuccess),
            "failed" => Ok(Self::Failed),
            other => Err(ForgeError::InvalidRequest(format!("unknown project status '{other}'"))),
        }
    }
}

/// Listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
    /// Only projects with this overall status.
    pub status: Option<ProjectStatus>,
}

impl ProjectFilter {
    /// Matches every project.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches one status.
    #[must_use]
    pub fn with_status(status: ProjectStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    /// Returns true if the summary passes the filter.
    #[must_use]
    pub fn matches(&self, summary: &ProjectSummary) -> bool {
        self.status.map_or(true, |s| s == summary.status)
    }
}

/// One line of a project listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    /// Project slug.
    pub slug: String,
    /// Project topic.
    pub topic: String,
    /// Overall status.
    pub status: ProjectStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last persisted change.
    pub updated_at: DateTime<Utc>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            slug: project.slug.clone(),
            topic: project.topic.clone(),
            status: ProjectStatus::of(project),
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

/// Backing store for projects.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Loads a project, or `ProjectNotFound`.
    async fn load(&self, slug: &str) -> ForgeResult<Project>;

    /// Atomically replaces the stored project.
    async fn save(&self, project: &Project) -> ForgeResult<()>;

    /// Lists summaries, oldest first.
    async fn list(&self, filter: &ProjectFilter) -> ForgeResult<Vec<ProjectSummary>>;

    /// Removes a project, or `ProjectNotFound`.
    async fn delete(&self, slug: &str) -> ForgeResult<()>;

    /// Returns true if a project is stored under the slug.
    async fn exists(&self, slug: &str) -> ForgeResult<bool> {
        match self.load(slug).await {
            Ok(_) => Ok(true),
            Err(ForgeError::ProjectNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn sort_summaries(summaries: &mut [ProjectSummary]) {
    summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.slug.cmp(&b.slug)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentConstraints, FeatureFlags, StageName};

    #[test]
    fn test_status_of_fresh_project_is_incomplete() {
        let p = Project::new("a", "a", FeatureFlags::default(), ContentConstraints::default());
        assert_eq!(ProjectStatus::of(&p), ProjectStatus::Incomplete);
    }

    #[test]
    fn test_status_of_failed_project() {
        let mut p = Project::new("a", "a", FeatureFlags::default(), ContentConstraints::default());
        for name in StageName::ALL {
            let stage = p.stage_mut(name);
            if name == StageName::ContentGeneration {
                stage.begin().unwrap();
                stage.fail("boom").unwrap();
            } else {
                stage.skip(crate::core::SkipReason::FlagDisabled).unwrap();
            }
        }
        assert_eq!(ProjectStatus::of(&p), ProjectStatus::Failed);
    }

    #[test]
    fn test_status_of_cancelled_project_is_incomplete() {
        let mut p = Project::new("a", "a", FeatureFlags::default(), ContentConstraints::default());
        for name in StageName::ALL {
            p.stage_mut(name)
                .skip(crate::core::SkipReason::Cancelled {
                    detail: "shutdown".to_string(),
                })
                .unwrap();
        }
        assert_eq!(ProjectStatus::of(&p), ProjectStatus::Incomplete);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("partial".parse::<ProjectStatus>().unwrap(), ProjectStatus::PartialSuccess);
        assert_eq!("Succeeded".parse::<ProjectStatus>().unwrap(), ProjectStatus::Succeeded);
        assert!("bogus".parse::<ProjectStatus>().is_err());
    }
}
