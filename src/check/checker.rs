use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::check::error::CheckError;
use crate::check::state::{SourceState, VersionState};
use crate::manifest::source::ManifestSource;
use crate::remote::fetch::Fetcher;
use crate::remote::git::GitRemote;
use crate::remote::query::QueryRunner;
use crate::version::{ConstraintSet, Scheme, VersionValue};

/// External capabilities shared by every check of a run
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub git: Arc<dyn GitRemote>,
    pub query: Arc<dyn QueryRunner>,
}

/// Everything a checker may read while checking one source
#[derive(Clone)]
pub struct CheckContext {
    pub collaborators: Collaborators,
    /// Declared `parent-id`, if any
    pub parent_id: Option<String>,
    /// Terminal state of the parent; `None` when there is no parent or it failed
    pub parent: Option<Arc<SourceState>>,
    pub scheme: Scheme,
    pub constraints: ConstraintSet,
}

impl CheckContext {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            parent_id: None,
            parent: None,
            scheme: Scheme::default(),
            constraints: ConstraintSet::default(),
        }
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.collaborators.fetcher.as_ref()
    }

    pub fn git(&self) -> &dyn GitRemote {
        self.collaborators.git.as_ref()
    }

    pub fn query(&self) -> &dyn QueryRunner {
        self.collaborators.query.as_ref()
    }

    /// Picks one candidate under this context's scheme and constraints
    pub fn select<T>(
        &self,
        candidates: impl IntoIterator<Item = (String, T)>,
        selection: Selection,
    ) -> Option<Selected<T>> {
        select(candidates, self.scheme, &self.constraints, selection)
    }
}

/// Determines the latest upstream state of one source.
///
/// `Ok(None)` means nothing newer could be found. Errors are turned into
/// BROKEN or ERROR states by the caller.
#[async_trait]
pub trait Checker: Send + Sync {
    /// The `type` this checker handles
    fn type_name(&self) -> &'static str;

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError>;
}

/// Which candidate wins among those passing the constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Greatest version; the first one listed wins a tie
    Greatest,
    /// First in listing order
    First,
    /// Last in listing order
    Last,
}

#[derive(Debug, Clone)]
pub struct Selected<T> {
    pub version: VersionValue,
    pub item: T,
}

/// Chooses among `(raw version, item)` candidates.
///
/// Candidates that do not parse under `scheme` or fail `constraints` are
/// skipped.
pub fn select<T>(
    candidates: impl IntoIterator<Item = (String, T)>,
    scheme: Scheme,
    constraints: &ConstraintSet,
    selection: Selection,
) -> Option<Selected<T>> {
    let mut best: Option<Selected<T>> = None;

    for (raw, item) in candidates {
        let version = match VersionValue::parse(&raw, scheme) {
            Ok(version) => version,
            Err(e) => {
                debug!("Skipping candidate: {}", e);
                continue;
            }
        };
        if !constraints.matches(&version) {
            continue;
        }

        let replace = match (&best, selection) {
            (None, _) => true,
            (Some(_), Selection::First) => false,
            (Some(_), Selection::Last) => true,
            (Some(current), Selection::Greatest) => version
                .compare(&current.version)
                .is_ok_and(|ordering| ordering.is_gt()),
        };
        if replace {
            best = Some(Selected { version, item });
        }
    }

    best
}
