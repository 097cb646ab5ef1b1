//! Port-to-stage wiring.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::ports::{
    Announcement, BinaryCompiler, ChannelAnnouncer, ContentGenerator, DocumentArtifact, DocumentRenderer,
    GenerationRequest, PublishBundle, RenderRequest, RepositoryPublisher, RepositoryUrl, SitePublisher, SiteUrl,
    TypesetArtifact, BinaryArtifact,
};
use super::{StageAdapter, StageContext, StageYield};
use crate::core::{ArtifactKind, StageName};
use crate::errors::AdapterError;

fn location(path: &std::path::Path) -> String {
    path.display().to_string()
}

async fn ensure_workspace(ctx: &StageContext) -> Result<(), AdapterError> {
    tokio::fs::create_dir_all(&ctx.workspace)
        .await
        .map_err(AdapterError::from)
}

/// Runs a [`ContentGenerator`].
pub struct ContentGenerationStage {
    generator: Arc<dyn ContentGenerator>,
}

impl ContentGenerationStage {
    /// Wraps a generator.
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }
}

impl std::fmt::Debug for ContentGenerationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentGenerationStage")
    }
}

#[async_trait]
impl StageAdapter for ContentGenerationStage {
    fn stage(&self) -> StageName {
        StageName::ContentGeneration
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        ensure_workspace(ctx).await?;
        let request = GenerationRequest {
            slug: ctx.slug.clone(),
            topic: ctx.topic.clone(),
            constraints: ctx.constraints.clone(),
            workspace: ctx.workspace.clone(),
        };
        let document = self.generator.generate(&request).await?;
        Ok(StageYield::artifact(location(&document.path)))
    }
}

/// Runs a [`DocumentRenderer`].
pub struct DocumentRenderingStage {
    renderer: Arc<dyn DocumentRenderer>,
}

impl DocumentRenderingStage {
    /// Wraps a renderer.
    pub fn new(renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { renderer }
    }
}

impl std::fmt::Debug for DocumentRenderingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocumentRenderingStage")
    }
}

#[async_trait]
impl StageAdapter for DocumentRenderingStage {
    fn stage(&self) -> StageName {
        StageName::DocumentRendering
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        let request = RenderRequest {
            document: DocumentArtifact {
                path: PathBuf::from(ctx.require(ArtifactKind::Document)?),
            },
            title: ctx.topic.clone(),
            constraints: ctx.constraints.clone(),
        };
        let typeset = self.renderer.render(&request).await?;
        Ok(StageYield::artifact(location(&typeset.path)))
    }
}

/// Runs a [`BinaryCompiler`].
pub struct BinaryCompilationStage {
    compiler: Arc<dyn BinaryCompiler>,
}

impl BinaryCompilationStage {
    /// Wraps a compiler.
    pub fn new(compiler: Arc<dyn BinaryCompiler>) -> Self {
        Self { compiler }
    }
}

impl std::fmt::Debug for BinaryCompilationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BinaryCompilationStage")
    }
}

#[async_trait]
impl StageAdapter for BinaryCompilationStage {
    fn stage(&self) -> StageName {
        StageName::BinaryCompilation
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        let source = TypesetArtifact {
            path: PathBuf::from(ctx.require(ArtifactKind::TypesetSource)?),
        };
        let binary = self.compiler.compile(&source).await?;
        Ok(StageYield::artifact(location(&binary.path)))
    }
}

/// Runs a [`RepositoryPublisher`] with whatever artifacts exist.
pub struct RepositoryPublishStage {
    publisher: Arc<dyn RepositoryPublisher>,
}

impl RepositoryPublishStage {
    /// Wraps a publisher.
    pub fn new(publisher: Arc<dyn RepositoryPublisher>) -> Self {
        Self { publisher }
    }
}

impl std::fmt::Debug for RepositoryPublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RepositoryPublishStage")
    }
}

#[async_trait]
impl StageAdapter for RepositoryPublishStage {
    fn stage(&self) -> StageName {
        StageName::RepositoryPublish
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        let bundle = PublishBundle {
            topic: ctx.topic.clone(),
            workspace: ctx.workspace.clone(),
            document: ctx.artifact(ArtifactKind::Document).map(|p| DocumentArtifact { path: p.into() }),
            typeset: ctx
                .artifact(ArtifactKind::TypesetSource)
                .map(|p| TypesetArtifact { path: p.into() }),
            binary: ctx.artifact(ArtifactKind::Binary).map(|p| BinaryArtifact { path: p.into() }),
        };
        if bundle.document.is_none() && bundle.binary.is_none() {
            return Err(AdapterError::invalid_input("nothing to publish"));
        }
        ensure_workspace(ctx).await?;
        let url = self.publisher.publish(&ctx.slug, &bundle).await?;
        Ok(StageYield::artifact(url.0))
    }
}

/// Runs a [`SitePublisher`].
pub struct SitePublishStage {
    publisher: Arc<dyn SitePublisher>,
}

impl SitePublishStage {
    /// Wraps a site publisher.
    pub fn new(publisher: Arc<dyn SitePublisher>) -> Self {
        Self { publisher }
    }
}

impl std::fmt::Debug for SitePublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SitePublishStage")
    }
}

#[async_trait]
impl StageAdapter for SitePublishStage {
    fn stage(&self) -> StageName {
        StageName::SitePublish
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        let repository = RepositoryUrl(ctx.require(ArtifactKind::RepositoryUrl)?.to_string());
        let site = self.publisher.publish(&ctx.slug, &repository).await?;
        Ok(StageYield::artifact(site.0))
    }
}

/// Runs a [`ChannelAnnouncer`], skipping channels already announced.
pub struct ChannelAnnounceStage {
    announcer: Arc<dyn ChannelAnnouncer>,
}

impl ChannelAnnounceStage {
    /// Wraps an announcer.
    pub fn new(announcer: Arc<dyn ChannelAnnouncer>) -> Self {
        Self { announcer }
    }
}

impl std::fmt::Debug for ChannelAnnounceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelAnnounceStage")
    }
}

#[async_trait]
impl StageAdapter for ChannelAnnounceStage {
    fn stage(&self) -> StageName {
        StageName::ChannelAnnounce
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageYield, AdapterError> {
        let announcement = Announcement {
            slug: ctx.slug.clone(),
            topic: ctx.topic.clone(),
            repository_url: RepositoryUrl(ctx.require(ArtifactKind::RepositoryUrl)?.to_string()),
            site_url: ctx
                .artifact(ArtifactKind::SiteUrl)
                .map(|s| SiteUrl(s.to_string())),
            skip_channels: ctx.announced_channels.clone(),
            progress: ctx.progress.clone(),
        };
        let outcomes = self.announcer.announce(&announcement).await;
        Ok(StageYield::channels(
            outcomes
                .into_iter()
                .filter(|o| !ctx.announced_channels.contains(&o.channel))
                .collect(),
        ))
    }
}

/// The adapter registered for each stage.
#[derive(Debug, Clone, Default)]
pub struct StageAdapters {
    adapters: BTreeMap<StageName, Arc<dyn StageAdapter>>,
}

impl StageAdapters {
    /// No adapters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under the stage it reports.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn StageAdapter>) -> Self {
        self.adapters.insert(adapter.stage(), adapter);
        self
    }

    /// Registers a content generator.
    #[must_use]
    pub fn with_content_generator(self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.with_adapter(Arc::new(ContentGenerationStage::new(generator)))
    }

    /// Registers a document renderer.
    #[must_use]
    pub fn with_document_renderer(self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.with_adapter(Arc::new(DocumentRenderingStage::new(renderer)))
    }

    /// Registers a binary compiler.
    #[must_use]
    pub fn with_binary_compiler(self, compiler: Arc<dyn BinaryCompiler>) -> Self {
        self.with_adapter(Arc::new(BinaryCompilationStage::new(compiler)))
    }

    /// Registers a repository publisher.
    #[must_use]
    pub fn with_repository_publisher(self, publisher: Arc<dyn RepositoryPublisher>) -> Self {
        self.with_adapter(Arc::new(RepositoryPublishStage::new(publisher)))
    }

    /// Registers a site publisher.
    #[must_use]
    pub fn with_site_publisher(self, publisher: Arc<dyn SitePublisher>) -> Self {
        self.with_adapter(Arc::new(SitePublishStage::new(publisher)))
    }

    /// Registers a channel announcer.
    #[must_use]
    pub fn with_channel_announcer(self, announcer: Arc<dyn ChannelAnnouncer>) -> Self {
        self.with_adapter(Arc::new(ChannelAnnounceStage::new(announcer)))
    }

    /// The adapter for a stage.
    #[must_use]
    pub fn get(&self, stage: StageName) -> Option<Arc<dyn StageAdapter>> {
        self.adapters.get(&stage).cloned()
    }

    /// Stages with a registered adapter.
    #[must_use]
    pub fn registered(&self) -> Vec<StageName> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChannelOutcome, ContentConstraints, FeatureFlags, Project};
    use crate::stages::ports::{MockChannelAnnouncer, MockContentGenerator, MockRepositoryPublisher};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn context(root: &std::path::Path) -> StageContext {
        let project = Project::new("a-240101", "quantum noise", FeatureFlags::all(), ContentConstraints::default());
        StageContext::from_project(&project, root, 1)
    }

    #[tokio::test]
    async fn test_content_stage_creates_workspace() {
        let tmp = TempDir::new().unwrap();
        let mut generator = MockContentGenerator::new();
        generator.expect_generate().times(1).returning(|req| {
            assert!(req.workspace.is_dir());
            Ok(DocumentArtifact {
                path: req.workspace.join(format!("{}.md", req.slug)),
            })
        });

        let stage = ContentGenerationStage::new(Arc::new(generator));
        let ctx = context(tmp.path());
        let out = stage.execute(&ctx).await.unwrap();
        assert!(out.artifact.unwrap().ends_with("a-240101.md"));
    }

    #[tokio::test]
    async fn test_content_stage_passes_errors_through() {
        let tmp = TempDir::new().unwrap();
        let mut generator = MockContentGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Err(AdapterError::rate_limited("429")));

        let stage = ContentGenerationStage::new(Arc::new(generator));
        let err = stage.execute(&context(tmp.path())).await.unwrap_err();
        assert_eq!(err, AdapterError::rate_limited("429"));
    }

    #[tokio::test]
    async fn test_repository_stage_needs_document_or_binary() {
        let tmp = TempDir::new().unwrap();
        let mut publisher = MockRepositoryPublisher::new();
        publisher.expect_publish().times(0);

        let stage = RepositoryPublishStage::new(Arc::new(publisher));
        let err = stage.execute(&context(tmp.path())).await.unwrap_err();
        assert_eq!(err.category, crate::errors::ErrorCategory::InvalidInput);
    }

    #[tokio::test]
    async fn test_repository_stage_publishes_raw_document() {
        let tmp = TempDir::new().unwrap();
        let mut publisher = MockRepositoryPublisher::new();
        publisher.expect_publish().times(1).returning(|slug, bundle| {
            assert!(bundle.document.is_some());
            assert!(bundle.binary.is_none());
            Ok(RepositoryUrl(format!("https://github.com/me/{slug}")))
        });

        let mut ctx = context(tmp.path());
        ctx.artifacts
            .insert(ArtifactKind::Document, "/w/a-240101.md".to_string());
        let out = RepositoryPublishStage::new(Arc::new(publisher))
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(out.artifact.as_deref(), Some("https://github.com/me/a-240101"));
    }

    #[tokio::test]
    async fn test_announce_stage_passes_skip_set() {
        let tmp = TempDir::new().unwrap();
        let mut announcer = MockChannelAnnouncer::new();
        announcer.expect_announce().times(1).returning(|a| {
            assert_eq!(a.skip_channels, BTreeSet::from(["twitter".to_string()]));
            vec![ChannelOutcome::posted("linkedin", None)]
        });

        let mut ctx = context(tmp.path());
        ctx.artifacts
            .insert(ArtifactKind::RepositoryUrl, "https://github.com/me/a".to_string());
        ctx.announced_channels.insert("twitter".to_string());

        let out = ChannelAnnounceStage::new(Arc::new(announcer))
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(out.channels.len(), 1);
        assert_eq!(out.channels[0].channel, "linkedin");
    }

    #[test]
    fn test_registry_keys_by_stage() {
        let adapters = StageAdapters::new()
            .with_content_generator(Arc::new(MockContentGenerator::new()))
            .with_channel_announcer(Arc::new(MockChannelAnnouncer::new()));
        assert_eq!(
            adapters.registered(),
            vec![StageName::ContentGeneration, StageName::ChannelAnnounce]
        );
        assert!(adapters.get(StageName::SitePublish).is_none());
    }
}
