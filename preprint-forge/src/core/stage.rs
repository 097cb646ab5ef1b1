//! The six pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ArtifactKind;

/// One unit of pipeline work.
///
/// Declaration order is dependency order, so `Ord` can be used to walk the
/// pipeline and to key ordered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Produces the Markdown document.
    ContentGeneration,
    /// Converts the document to LaTeX.
    DocumentRendering,
    /// Compiles the LaTeX source to PDF.
    BinaryCompilation,
    /// Pushes artifacts to the hosting repository.
    RepositoryPublish,
    /// Enables the companion site.
    SitePublish,
    /// Posts the announcement on external channels.
    ChannelAnnounce,
}

impl StageName {
    /// Every stage, in dependency order.
    pub const ALL: [Self; 6] = [
        Self::ContentGeneration,
        Self::DocumentRendering,
        Self::BinaryCompilation,
        Self::RepositoryPublish,
        Self::SitePublish,
        Self::ChannelAnnounce,
    ];

    /// The artifact kind this stage owns, if any.
    ///
    /// A stage may only ever write its own kind into a project's artifacts.
    #[must_use]
    pub fn produces(self) -> Option<ArtifactKind> {
        match self {
            Self::ContentGeneration => Some(ArtifactKind::Document),
            Self::DocumentRendering => Some(ArtifactKind::TypesetSource),
            Self::BinaryCompilation => Some(ArtifactKind::Binary),
            Self::RepositoryPublish => Some(ArtifactKind::RepositoryUrl),
            Self::SitePublish => Some(ArtifactKind::SiteUrl),
            Self::ChannelAnnounce => None,
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentGeneration => "content_generation",
            Self::DocumentRendering => "document_rendering",
            Self::BinaryCompilation => "binary_compilation",
            Self::RepositoryPublish => "repository_publish",
            Self::SitePublish => "site_publish",
            Self::ChannelAnnounce => "channel_announce",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_sorted() {
        let mut sorted = StageName::ALL;
        sorted.sort();
        assert_eq!(sorted, StageName::ALL);
    }

    #[test]
    fn test_from_str_accepts_hyphens() {
        assert_eq!(
            "document-rendering".parse::<StageName>(),
            Ok(StageName::DocumentRendering)
        );
        assert!("publish".parse::<StageName>().is_err());
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&StageName::SitePublish).unwrap();
        assert_eq!(json, r#""site_publish""#);
    }

    #[test]
    fn test_announce_owns_no_artifact() {
        assert!(StageName::ChannelAnnounce.produces().is_none());
        assert_eq!(StageName::BinaryCompilation.produces(), Some(ArtifactKind::Binary));
    }
}
