//! Per-source update checks
//!
//! # Modules
//!
//! - [`config`]: typed `x-checker-data`, validated when parsed
//! - [`checker`]: the [`Checker`] trait, its context and candidate selection
//! - [`checkers`]: one implementation per checker `type`
//! - [`state`]: [`SourceState`] classification of a finished check
//! - [`error`]: [`ConfigError`] and [`CheckError`]

pub mod checker;
pub mod checkers;
pub mod config;
pub mod error;
pub mod state;

pub use checker::{CheckContext, Checker, Collaborators, Selection};
pub use checkers::build_checker;
pub use config::{CheckerConfig, CheckerKind, CommonOptions};
pub use error::{CheckError, ConfigError};
pub use state::{SourceState, Status, VersionState};
