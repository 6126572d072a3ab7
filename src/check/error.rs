use thiserror::Error;

use crate::manifest::source::Locator;
use crate::remote::error::{FetchError, GitError, QueryError};
use crate::version::error::{TemplateError, VersionError};

/// Malformed `x-checker-data`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Checker data is not an object")]
    NotAnObject,

    #[error("Checker data has no \"type\"")]
    MissingType,

    #[error("Unknown checker type {0:?}")]
    UnknownType(String),

    #[error("Invalid {checker} checker data: {source}")]
    Invalid {
        checker: String,
        source: serde_json::Error,
    },

    #[error("Invalid regular expression {pattern:?}: {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },

    #[error("Pattern {pattern:?} must have exactly {expected} capture group(s), found {found}")]
    CaptureGroups {
        pattern: String,
        expected: usize,
        found: usize,
    },

    #[error("{0}")]
    Conflict(String),
}

/// Failure of a single source check
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The source's own repository answered, but its branch or tag is gone
    #[error("{0}")]
    Missing(String),

    #[error("{checker} checker does not support {source_kind} sources")]
    UnsupportedSource {
        checker: &'static str,
        source_kind: &'static str,
    },

    #[error("Checksum mismatch for {url}: expected {kind} {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        kind: &'static str,
        expected: String,
        actual: String,
    },
}

impl CheckError {
    /// True when the upstream confirmed that `locator` itself does not exist.
    ///
    /// Such failures mark a source BROKEN. A 404 from a release page, an API
    /// or a redirector says nothing about the pinned locator and stays an ERROR.
    pub fn is_confirmed_absent(&self, locator: &Locator) -> bool {
        match (self, locator) {
            (CheckError::Fetch(FetchError::NotFound(missing)), Locator::Url { url }) => missing == url,
            (CheckError::Git(GitError::NotFound(missing)), Locator::Git { url, .. }) => missing == url,
            (CheckError::Missing(_), _) => true,
            _ => false,
        }
    }
}
