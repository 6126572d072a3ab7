//! Manifest parsing, source extraction and format-preserving patching
//!
//! # Modules
//!
//! - [`tree`]: format-independent node tree with byte spans
//! - [`json`] / [`yaml`]: tree-sitter front ends producing that tree
//! - [`source`]: [`Manifest`] loading and [`ManifestSource`] extraction
//! - [`patcher`]: rewrites accepted updates back into the original text

pub mod error;
pub mod json;
pub mod patcher;
pub mod source;
pub mod tree;
pub mod yaml;

pub use error::{ManifestError, PatchError};
pub use patcher::{PatchOutcome, accepted_updates, apply};
pub use source::{Format, Locator, Manifest, ManifestKind, ManifestSource, SourceKind};
