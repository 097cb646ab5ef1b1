//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The six pipeline stages and their status state machine
//! - Artifact references and channel outcomes
//! - The persisted project record and the run report built from it

mod artifact;
mod project;
mod report;
mod stage;
mod status;

pub use artifact::{ArtifactKind, ArtifactRef, ChannelOutcome};
pub use project::{ContentConstraints, FeatureFlags, Project, StageState};
pub use report::{RunOutcome, RunReport, StageReport};
pub use stage::StageName;
pub use status::{SkipReason, StageStatus};
