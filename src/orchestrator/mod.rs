//! Runs all checks of a manifest and gathers their results
//!
//! # Modules
//!
//! - [`graph`]: `source-id` / `parent-id` validation and ordering
//! - [`runner`]: the concurrent [`Orchestrator`]
//! - [`report`]: the collected [`RunReport`]

pub mod graph;
pub mod report;
pub mod runner;

pub use graph::{DependencyGraph, GraphError};
pub use report::RunReport;
pub use runner::{Orchestrator, RunOptions};
