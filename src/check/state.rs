//! Per-source check results

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::check::error::CheckError;
use crate::manifest::source::{Locator, ManifestSource};
use crate::remote::digest::Digests;
use crate::version::{ConstraintSet, Scheme, VersionValue};

/// Terminal classification of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Nothing newer was found
    Current,
    /// A newer version passing all constraints was found
    Updatable,
    /// The upstream confirmed the source is gone
    Broken,
    /// The check could not be completed
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Current => "CURRENT",
            Status::Updatable => "UPDATABLE",
            Status::Broken => "BROKEN",
            Status::Error => "ERROR",
        }
    }

    fn severity(self) -> u8 {
        match self {
            Status::Current => 0,
            Status::Updatable => 1,
            Status::Error => 2,
            Status::Broken => 3,
        }
    }

    /// Worst status observed, `BROKEN > ERROR > UPDATABLE > CURRENT`
    pub fn worst(statuses: impl IntoIterator<Item = Status>) -> Status {
        statuses
            .into_iter()
            .max_by_key(|status| status.severity())
            .unwrap_or(Status::Current)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locator, digests and version of one side of a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionState {
    #[serde(flatten)]
    pub locator: Locator,
    #[serde(flatten)]
    pub digests: Digests,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl VersionState {
    /// A URL state with nothing else known yet
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            locator: Locator::Url { url: url.into() },
            digests: Digests::default(),
            size: None,
            version: None,
            timestamp: None,
        }
    }

    pub fn git(
        url: impl Into<String>,
        tag: Option<String>,
        commit: Option<String>,
        branch: Option<String>,
    ) -> Self {
        Self {
            locator: Locator::Git {
                url: url.into(),
                branch,
                tag,
                commit,
            },
            digests: Digests::default(),
            size: None,
            version: None,
            timestamp: None,
        }
    }

    /// What the manifest currently declares
    pub fn from_source(source: &ManifestSource) -> Self {
        Self {
            locator: source.locator.clone(),
            digests: source.digests.clone(),
            size: source.size,
            version: None,
            timestamp: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_digests(mut self, digests: Digests) -> Self {
        self.digests = digests;
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Flat object handed to child checkers as `$parent.current` / `$parent.new`
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("url".into(), json!(self.locator.url()));
        object.insert("version".into(), json!(self.version));
        object.insert(
            "timestamp".into(),
            json!(self.timestamp.map(|t| t.to_rfc3339())),
        );
        match &self.locator {
            Locator::Url { .. } => {
                object.insert("sha256".into(), json!(self.digests.sha256));
                object.insert("sha512".into(), json!(self.digests.sha512));
                object.insert("size".into(), json!(self.size));
            }
            Locator::Git {
                branch,
                tag,
                commit,
                ..
            } => {
                object.insert("branch".into(), json!(branch));
                object.insert("tag".into(), json!(tag));
                object.insert("commit".into(), json!(commit));
            }
        }
        Value::Object(object)
    }

    /// True when this state points at the same content as `other`
    fn same_target(&self, other: &VersionState) -> bool {
        match (&self.locator, &other.locator) {
            (Locator::Url { url: a }, Locator::Url { url: b }) => {
                a == b && self.digests.same_content(&other.digests) != Some(false)
            }
            (
                Locator::Git {
                    tag: tag_a,
                    commit: commit_a,
                    ..
                },
                Locator::Git {
                    tag: tag_b,
                    commit: commit_b,
                    ..
                },
            ) => match (commit_a, commit_b) {
                (Some(a), Some(b)) => a == b,
                _ => match (tag_a, tag_b) {
                    (Some(a), Some(b)) => a == b,
                    _ => commit_a.is_none() && tag_a.is_none(),
                },
            },
            _ => false,
        }
    }
}

/// Result of checking one manifest source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceState {
    pub source_id: String,
    pub module: String,
    pub filename: String,
    /// Marked `is-important`, or `is-main-source` and not `is-important: false`
    pub important: bool,
    pub current: VersionState,
    pub new: Option<VersionState>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl SourceState {
    /// CURRENT with no new version
    pub fn unchanged(source: &ManifestSource, important: bool) -> Self {
        Self {
            source_id: source.id.clone(),
            module: source.module.clone(),
            filename: source.filename.clone(),
            important,
            current: VersionState::from_source(source),
            new: None,
            status: Status::Current,
            cause: None,
        }
    }

    /// Classifies a successful check.
    ///
    /// The state is UPDATABLE only when `new` points somewhere else than the
    /// manifest does and its version (if any) satisfies `constraints`.
    pub fn checked(
        source: &ManifestSource,
        important: bool,
        new: Option<VersionState>,
        constraints: &ConstraintSet,
        scheme: Scheme,
    ) -> Self {
        let mut state = Self::unchanged(source, important);
        let Some(new) = new else {
            return state;
        };

        if new.same_target(&state.current) {
            debug!("{}: up to date", state.name());
            state.current.version = new.version.clone();
            return state;
        }

        if let Some(version) = &new.version
            && !constraints.is_empty()
        {
            let allowed = VersionValue::parse(version, scheme)
                .map(|value| constraints.matches(&value))
                .unwrap_or(false);
            if !allowed {
                debug!("{}: {} is excluded by constraints", state.name(), version);
                return state;
            }
        }

        state.new = Some(new);
        state.status = Status::Updatable;
        state
    }

    /// Classifies a failed check as BROKEN or ERROR
    pub fn failed(source: &ManifestSource, important: bool, error: &CheckError) -> Self {
        let status = if error.is_confirmed_absent(&source.locator) {
            Status::Broken
        } else {
            Status::Error
        };
        Self::with_cause(source, important, status, error.to_string())
    }

    pub fn with_cause(
        source: &ManifestSource,
        important: bool,
        status: Status,
        cause: impl Into<String>,
    ) -> Self {
        let mut state = Self::unchanged(source, important);
        state.status = status;
        state.cause = Some(cause.into());
        state
    }

    pub fn name(&self) -> String {
        format!("{}/{}", self.module, self.filename)
    }

    /// The `{current, new}` object exposed to child sources
    pub fn parent_json(&self) -> Value {
        json!({
            "current": self.current.to_json(),
            "new": self.new.as_ref().map(VersionState::to_json),
        })
    }
}
