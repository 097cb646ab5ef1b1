//! # Preprint Forge
//!
//! A resumable pipeline that turns a topic into a published paper.
//!
//! A run walks a fixed sequence of stages (content generation, document
//! rendering, binary compilation, repository publish, site publish, channel
//! announce) for one project. It provides:
//!
//! - **Durable naming**: every topic gets a unique, never-recycled slug
//! - **Resumability**: per-stage state is persisted after every transition,
//!   so a rerun continues where the last one stopped
//! - **Partial-failure semantics**: a failed stage only skips the stages that
//!   depend on it, and the run is reported as a partial success
//! - **Retries and cancellation**: transient failures back off and retry;
//!   a cancelled run leaves a consistent, resumable record
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use preprint_forge::prelude::*;
//!
//! let config = ForgeConfig::load(None)?;
//! let orchestrator = config.build_orchestrator().await?;
//!
//! let report = orchestrator.run(RunRequest::new("quantum noise")).await?;
//! println!("{} -> {}", report.slug, report.outcome);
//!
//! // Later: regenerate the PDF and everything downstream of it.
//! orchestrator
//!     .run(RunRequest::resume(&report.slug).with_force(StageName::BinaryCompilation))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod identity;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::ForgeConfig;
    pub use crate::core::{
        ArtifactKind, ContentConstraints, FeatureFlags, Project, RunOutcome, RunReport, SkipReason, StageName,
        StageStatus,
    };
    pub use crate::errors::{AdapterError, ErrorCategory, ForgeError, ForgeResult};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::identity::IdentityRegistry;
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Orchestrator, RetryPolicy, RunRequest, StagePolicies};
    pub use crate::stages::{StageAdapter, StageAdapters, StageContext, StageYield};
    pub use crate::store::{FileRunStateStore, InMemoryRunStateStore, ProjectFilter, ProjectStatus, RunStateStore};
}
