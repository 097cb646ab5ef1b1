//! One JSON document per project.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{sort_summaries, ProjectFilter, ProjectSummary, RunStateStore};
use crate::core::Project;
use crate::errors::{ForgeError, ForgeResult};

/// Stores `<dir>/<slug>.json`, replaced by write-to-temp then rename.
///
/// Readers only ever see the previous or the new document. Saves for
/// different slugs touch different files and never interfere.
#[derive(Debug, Clone)]
pub struct FileRunStateStore {
    dir: PathBuf,
}

impl FileRunStateStore {
    /// Opens (creating if needed) the projects directory.
    pub async fn open(dir: impl Into<PathBuf>) -> ForgeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ForgeError::persistence(&dir, e))?;
        Ok(Self { dir })
    }

    /// The projects directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{slug}.json"))
    }

    async fn read(path: &Path) -> ForgeResult<Project> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| ForgeError::persistence(path, e))?;
        let mut project: Project =
            serde_json::from_slice(&bytes).map_err(|e| ForgeError::persistence(path, e))?;
        project.ensure_stages();
        Ok(project)
    }
}

#[async_trait]
impl RunStateStore for FileRunStateStore {
    async fn load(&self, slug: &str) -> ForgeResult<Project> {
        let path = self.path_for(slug);
        match fs::try_exists(&path).await {
            Ok(true) => Self::read(&path).await,
            Ok(false) => Err(ForgeError::ProjectNotFound {
                slug: slug.to_string(),
            }),
            Err(e) => Err(ForgeError::persistence(&path, e)),
        }
    }

    async fn save(&self, project: &Project) -> ForgeResult<()> {
        let path = self.path_for(&project.slug);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", project.slug, uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(project)?;

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(ForgeError::persistence(&path, e));
        }
        debug!(slug = %project.slug, "Saved run state");
        Ok(())
    }

    async fn list(&self, filter: &ProjectFilter) -> ForgeResult<Vec<ProjectSummary>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| ForgeError::persistence(&self.dir, e))?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ForgeError::persistence(&self.dir, e))?
        {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden || path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(project) => {
                    let summary = ProjectSummary::from(&project);
                    if filter.matches(&summary) {
                        summaries.push(summary);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable project"),
            }
        }

        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, slug: &str) -> ForgeResult<()> {
        let path = self.path_for(slug);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ForgeError::ProjectNotFound {
                slug: slug.to_string(),
            }),
            Err(e) => Err(ForgeError::persistence(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentConstraints, FeatureFlags, SkipReason, StageName};
    use crate::store::{ProjectStatus, ProjectFilter};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn project(slug: &str) -> Project {
        Project::new(slug, "quantum noise", FeatureFlags::default(), ContentConstraints::default())
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let store = FileRunStateStore::open(tmp.path().join("projects")).await.unwrap();
        let mut p = project("quantum-noise-240101");
        p.record_artifact(StageName::ContentGeneration, "/w/quantum-noise-240101.md");

        store.save(&p).await.unwrap();
        let reopened = FileRunStateStore::open(tmp.path().join("projects")).await.unwrap();
        assert_eq!(reopened.load("quantum-noise-240101").await.unwrap(), p);
    }

    #[tokio::test]
    async fn test_missing_project() {
        let tmp = TempDir::new().unwrap();
        let store = FileRunStateStore::open(tmp.path()).await.unwrap();
        assert!(matches!(
            store.load("nope").await,
            Err(ForgeError::ProjectNotFound { .. })
        ));
        assert!(matches!(
            store.delete("nope").await,
            Err(ForgeError::ProjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = FileRunStateStore::open(tmp.path()).await.unwrap();
        let p = project("a-240101");
        store.save(&p).await.unwrap();
        store.save(&p).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a-240101.json".to_string()]);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let tmp = TempDir::new().unwrap();
        let store = FileRunStateStore::open(tmp.path()).await.unwrap();

        store.save(&project("pending-240101")).await.unwrap();
        let mut failed = project("failed-240101");
        for name in StageName::ALL {
            let stage = failed.stage_mut(name);
            if name == StageName::ContentGeneration {
                stage.begin().unwrap();
                stage.fail("rate limited").unwrap();
            } else {
                stage.skip(SkipReason::FlagDisabled).unwrap();
            }
        }
        store.save(&failed).await.unwrap();
        std::fs::write(tmp.path().join("garbage.json"), b"{").unwrap();

        let all = store.list(&ProjectFilter::all()).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_failed = store
            .list(&ProjectFilter::with_status(ProjectStatus::Failed))
            .await
            .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].slug, "failed-240101");
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_different_slugs() {
        let tmp = TempDir::new().unwrap();
        let store = FileRunStateStore::open(tmp.path()).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.save(&project(&format!("p-{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.list(&ProjectFilter::all()).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_save_into_missing_dir_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileRunStateStore::open(tmp.path().join("gone")).await.unwrap();
        std::fs::remove_dir_all(tmp.path().join("gone")).unwrap();

        let err = store.save(&project("a")).await.unwrap_err();
        assert!(err.is_persistence());
    }
}
