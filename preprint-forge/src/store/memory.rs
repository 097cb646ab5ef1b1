//! In-memory run state store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{sort_summaries, ProjectFilter, ProjectSummary, RunStateStore};
use crate::core::Project;
use crate::errors::{ForgeError, ForgeResult};

/// Keeps projects in a map; clones on every read and write.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStateStore {
    projects: Arc<RwLock<HashMap<String, Project>>>,
}

impl InMemoryRunStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored projects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }
}

#[async_trait]
impl RunStateStore for InMemoryRunStateStore {
    async fn load(&self, slug: &str) -> ForgeResult<Project> {
        self.projects
            .read()
            .get(slug)
            .cloned()
            .ok_or_else(|| ForgeError::ProjectNotFound {
                slug: slug.to_string(),
            })
    }

    async fn save(&self, project: &Project) -> ForgeResult<()> {
        self.projects
            .write()
            .insert(project.slug.clone(), project.clone());
        Ok(())
    }

    async fn list(&self, filter: &ProjectFilter) -> ForgeResult<Vec<ProjectSummary>> {
        let mut summaries: Vec<ProjectSummary> = self
            .projects
            .read()
            .values()
            .map(ProjectSummary::from)
            .filter(|s| filter.matches(s))
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, slug: &str) -> ForgeResult<()> {
        self.projects
            .write()
            .remove(slug)
            .map(|_| ())
            .ok_or_else(|| ForgeError::ProjectNotFound {
                slug: slug.to_string(),
            })
    }
}
