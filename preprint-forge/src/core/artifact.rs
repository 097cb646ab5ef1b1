//! Artifact references recorded on a project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AdapterError;

/// The kind of artifact a stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Generated Markdown document.
    Document,
    /// LaTeX source.
    TypesetSource,
    /// Compiled PDF.
    Binary,
    /// Hosting repository URL.
    RepositoryUrl,
    /// Companion site URL.
    SiteUrl,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => write!(f, "document"),
            Self::TypesetSource => write!(f, "typeset_source"),
            Self::Binary => write!(f, "binary"),
            Self::RepositoryUrl => write!(f, "repository_url"),
            Self::SiteUrl => write!(f, "site_url"),
        }
    }
}

/// A location reference for a produced artifact (a path or a URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Where the artifact lives.
    pub location: String,
    /// When the artifact was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl ArtifactRef {
    /// Creates a reference stamped with the current time.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Result of posting an announcement to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOutcome {
    /// Channel name (e.g. "twitter").
    pub channel: String,
    /// Remote reference of the post, when the channel returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_ref: Option<String>,
    /// The failure, if the post did not go through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AdapterError>,
}

impl ChannelOutcome {
    /// A successful post.
    #[must_use]
    pub fn posted(channel: impl Into<String>, post_ref: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            post_ref,
            error: None,
        }
    }

    /// A failed post.
    #[must_use]
    pub fn failed(channel: impl Into<String>, error: AdapterError) -> Self {
        Self {
            channel: channel.into(),
            post_ref: None,
            error: Some(error),
        }
    }

    /// Returns true if the post went through.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
