//! Collaborator ports.
//!
//! One narrow trait per external capability. Each stage wrapper only holds
//! the port it needs, and tests substitute `mockall` doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

use super::ChannelProgress;
use crate::core::{ChannelOutcome, ContentConstraints};
use crate::errors::AdapterError;

/// Generated Markdown on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentArtifact {
    /// Path of the `.md` file.
    pub path: PathBuf,
}

/// LaTeX source on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypesetArtifact {
    /// Path of the `.tex` file.
    pub path: PathBuf,
}

/// Compiled PDF on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryArtifact {
    /// Path of the `.pdf` file.
    pub path: PathBuf,
}

/// Hosting repository URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryUrl(pub String);

/// Companion site URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteUrl(pub String);

/// Input to the content generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Project slug; names the output file.
    pub slug: String,
    /// Topic to write about.
    pub topic: String,
    /// Authoring metadata and word bounds.
    pub constraints: ContentConstraints,
    /// Directory to write into.
    pub workspace: PathBuf,
}

/// Input to the document renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// The Markdown to convert.
    pub document: DocumentArtifact,
    /// Title for the front matter.
    pub title: String,
    /// Author block.
    pub constraints: ContentConstraints,
}

/// Everything the repository publisher may push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishBundle {
    /// Project topic, used for the repository description.
    pub topic: String,
    /// Directory holding the artifacts.
    pub workspace: PathBuf,
    /// Markdown, when generated.
    pub document: Option<DocumentArtifact>,
    /// LaTeX, when rendered.
    pub typeset: Option<TypesetArtifact>,
    /// PDF, when compiled.
    pub binary: Option<BinaryArtifact>,
}

/// An announcement to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Project slug.
    pub slug: String,
    /// Project topic.
    pub topic: String,
    /// Where the paper lives.
    pub repository_url: RepositoryUrl,
    /// Companion site, when published.
    pub site_url: Option<SiteUrl>,
    /// Channels that already carry this announcement and must not be posted again.
    pub skip_channels: BTreeSet<String>,
    /// Where each channel outcome is reported as soon as it is known.
    pub progress: ChannelProgress,
}

impl Announcement {
    /// The message text posted to every channel.
    #[must_use]
    pub fn message(&self) -> String {
        let link = self
            .site_url
            .as_ref()
            .map_or(self.repository_url.0.as_str(), |s| s.0.as_str());
        format!("New paper: {}\n{}", self.topic, link)
    }
}

/// Produces the Markdown document.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Writes the document and returns where it is.
    async fn generate(&self, request: &GenerationRequest) -> Result<DocumentArtifact, AdapterError>;
}

/// Converts Markdown into LaTeX.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Writes the LaTeX source next to the document.
    async fn render(&self, request: &RenderRequest) -> Result<TypesetArtifact, AdapterError>;
}

/// Compiles LaTeX into a PDF.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BinaryCompiler: Send + Sync {
    /// Compiles and returns the PDF location.
    async fn compile(&self, source: &TypesetArtifact) -> Result<BinaryArtifact, AdapterError>;
}

/// Pushes artifacts to a hosting repository.
///
/// Publishing the same slug twice must update the existing repository.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RepositoryPublisher: Send + Sync {
    /// Publishes and returns the repository URL.
    async fn publish(&self, slug: &str, bundle: &PublishBundle) -> Result<RepositoryUrl, AdapterError>;
}

/// Enables the companion site for a repository.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SitePublisher: Send + Sync {
    /// Publishes and returns the site URL.
    async fn publish(&self, slug: &str, repository: &RepositoryUrl) -> Result<SiteUrl, AdapterError>;
}

/// Posts an announcement to external channels.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelAnnouncer: Send + Sync {
    /// Posts to every channel not in `skip_channels`; one outcome per channel tried.
    ///
    /// Each outcome is also reported to `progress` as soon as it is known.
    async fn announce(&self, announcement: &Announcement) -> Vec<ChannelOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_prefers_site_url() {
        let mut a = Announcement {
            slug: "a".to_string(),
            topic: "Quantum noise".to_string(),
            repository_url: RepositoryUrl("https://github.com/me/a".to_string()),
            site_url: None,
            skip_channels: BTreeSet::new(),
            progress: ChannelProgress::new(),
        };
        assert!(a.message().ends_with("https://github.com/me/a"));

        a.site_url = Some(SiteUrl("https://me.github.io/a".to_string()));
        assert!(a.message().ends_with("https://me.github.io/a"));
        assert!(a.message().starts_with("New paper: Quantum noise"));
    }
}
