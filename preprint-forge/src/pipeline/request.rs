//! Run requests.

use std::collections::BTreeSet;

use crate::core::{ContentConstraints, FeatureFlags, StageName};

/// Which project a run works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// Reserve a new slug for a topic.
    New {
        /// Free-text topic.
        topic: String,
        /// Caller-chosen slug instead of a derived one.
        slug: Option<String>,
    },
    /// Resume an existing project.
    Existing {
        /// The project slug.
        slug: String,
    },
}

/// A request to run (or resume) the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// The project.
    pub target: RunTarget,
    /// Flags for this run; `None` keeps the project's (or the defaults).
    pub flags: Option<FeatureFlags>,
    /// Stages to re-execute even if they succeeded, with everything downstream.
    pub force: BTreeSet<StageName>,
    /// Metadata override; `None` keeps the project's (or the defaults).
    pub constraints: Option<ContentConstraints>,
}

impl RunRequest {
    /// A run for a new topic.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            target: RunTarget::New {
                topic: topic.into(),
                slug: None,
            },
            flags: None,
            force: BTreeSet::new(),
            constraints: None,
        }
    }

    /// A resume of an existing project.
    #[must_use]
    pub fn resume(slug: impl Into<String>) -> Self {
        Self {
            target: RunTarget::Existing { slug: slug.into() },
            flags: None,
            force: BTreeSet::new(),
            constraints: None,
        }
    }

    /// Requests an explicit slug for a new project.
    #[must_use]
    pub fn with_slug(mut self, explicit: impl Into<String>) -> Self {
        if let RunTarget::New { slug, .. } = &mut self.target {
            *slug = Some(explicit.into());
        }
        self
    }

    /// Sets the feature flags.
    #[must_use]
    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Forces regeneration of a stage.
    #[must_use]
    pub fn with_force(mut self, stage: StageName) -> Self {
        self.force.insert(stage);
        self
    }

    /// Forces regeneration of several stages.
    #[must_use]
    pub fn with_forced<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = StageName>,
    {
        self.force.extend(stages);
        self
    }

    /// Sets the authoring metadata.
    #[must_use]
    pub fn with_constraints(mut self, constraints: ContentConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}
