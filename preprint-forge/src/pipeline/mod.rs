//! Pipeline orchestration.
//!
//! This module provides:
//! - The stage dependency graph
//! - Declarative per-stage retry policies
//! - Run requests and the orchestrator itself

mod graph;
mod orchestrator;
mod request;
mod retry;

pub use graph::{DependencyRule, StageGraph};
pub use orchestrator::Orchestrator;
pub use request::{RunRequest, RunTarget};
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, StagePolicies};
