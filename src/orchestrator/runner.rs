//! Concurrent, dependency-ordered execution of source checks

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::check::checker::{CheckContext, Collaborators};
use crate::check::checkers::build_checker;
use crate::check::config::CheckerConfig;
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::{SourceState, Status, VersionState};
use crate::config::{Endpoints, Settings};
use crate::manifest::source::{Locator, Manifest, ManifestSource};
use crate::orchestrator::graph::{DependencyGraph, GraphError, GraphNode};
use crate::orchestrator::report::RunReport;
use crate::remote::digest;
use crate::remote::error::FetchError;
use crate::remote::fetch::{FetchRequest, Fetcher};

const SOURCE_ID_KEY: &str = "source-id";
const PARENT_ID_KEY: &str = "parent-id";

/// Published once a source reaches a terminal state
type ParentSlot = Option<Arc<SourceState>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Checks running at the same time
    pub concurrency: usize,
    /// Overall deadline for the whole run
    pub timeout: Option<Duration>,
    /// Download new URLs to fill in digests the checker did not report
    pub complete_digests: bool,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            concurrency: settings.concurrency,
            timeout: settings.timeout(),
            complete_digests: settings.complete_digests,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// A source carrying `x-checker-data`, with its config parsed up front
struct Planned {
    source: ManifestSource,
    name: String,
    config: Result<CheckerConfig, ConfigError>,
}

impl Planned {
    fn new(source: ManifestSource, data: &Value) -> Self {
        let config = CheckerConfig::from_value(data);
        if let Err(e) = &config {
            warn!("{}: invalid checker data: {}", source.display_name(), e);
        }
        Self {
            name: source.display_name(),
            source,
            config,
        }
    }

    /// Ids are read from the raw data so a malformed config still takes part in the graph
    fn raw_id(&self, key: &str) -> Option<&str> {
        self.source.checker_data.as_ref()?.get(key)?.as_str()
    }

    fn graph_node(&self) -> GraphNode<'_> {
        GraphNode {
            name: &self.name,
            source_id: self.raw_id(SOURCE_ID_KEY),
            parent_id: self.raw_id(PARENT_ID_KEY),
        }
    }

    fn important(&self) -> bool {
        self.config
            .as_ref()
            .map(|config| config.common.is_important())
            .unwrap_or(false)
    }
}

/// Runs every checker of a manifest and collects their terminal states
pub struct Orchestrator {
    collaborators: Collaborators,
    endpoints: Arc<Endpoints>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, endpoints: Endpoints, options: RunOptions) -> Self {
        Self {
            collaborators,
            endpoints: Arc::new(endpoints),
            options,
        }
    }

    /// Checks all sources with checker data.
    ///
    /// Graph errors abort the run before any check starts. Every other
    /// failure ends up as an ERROR or BROKEN state of its own source.
    pub async fn run(&self, manifest: &Manifest) -> Result<RunReport, GraphError> {
        let planned: Vec<Arc<Planned>> = manifest
            .sources()
            .into_iter()
            .filter_map(|source| {
                let data = source.checker_data.clone()?;
                Some(Arc::new(Planned::new(source, &data)))
            })
            .collect();

        let nodes: Vec<GraphNode> = planned.iter().map(|p| p.graph_node()).collect();
        let graph = DependencyGraph::build(&nodes)?;
        info!("Checking {} source(s) of {}", planned.len(), manifest.name);

        let states = self.execute(&planned, &graph).await;
        Ok(RunReport { states })
    }

    async fn execute(&self, planned: &[Arc<Planned>], graph: &DependencyGraph) -> Vec<SourceState> {
        let deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        let (senders, receivers): (Vec<_>, Vec<_>) =
            planned.iter().map(|_| watch::channel::<ParentSlot>(None)).unzip();
        let mut senders: Vec<Option<watch::Sender<ParentSlot>>> = senders.into_iter().map(Some).collect();

        let mut tasks = JoinSet::new();
        for &index in graph.order() {
            let Some(sender) = senders[index].take() else {
                continue;
            };
            let parent = graph.parent_of(index).map(|parent| receivers[parent].clone());
            let task = SourceTask {
                planned: planned[index].clone(),
                collaborators: self.collaborators.clone(),
                endpoints: self.endpoints.clone(),
                complete_digests: self.options.complete_digests,
            };
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let state = match deadline {
                    Some(deadline) => timeout_at(deadline, task.run(parent, semaphore))
                        .await
                        .unwrap_or_else(|_| task.cancelled()),
                    None => task.run(parent, semaphore).await,
                };
                let state = Arc::new(state);
                sender.send_replace(Some(state.clone()));
                (index, state)
            });
        }

        // Barrier: nothing is reported before every task has finished
        let mut states: Vec<Option<SourceState>> = vec![None; planned.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, state)) => states[index] = Some(Arc::unwrap_or_clone(state)),
                Err(e) => error!("Check task failed: {}", e),
            }
        }

        states
            .into_iter()
            .zip(planned)
            .map(|(state, planned)| {
                state.unwrap_or_else(|| {
                    SourceState::with_cause(&planned.source, planned.important(), Status::Error, "Check task failed")
                })
            })
            .collect()
    }
}

/// Everything one spawned check owns
struct SourceTask {
    planned: Arc<Planned>,
    collaborators: Collaborators,
    endpoints: Arc<Endpoints>,
    complete_digests: bool,
}

impl SourceTask {
    async fn run(&self, parent: Option<watch::Receiver<ParentSlot>>, semaphore: Arc<Semaphore>) -> SourceState {
        let parent = match parent {
            Some(mut receiver) => {
                debug!("{}: waiting for parent", self.planned.name);
                let published = receiver.wait_for(Option::is_some).await.map(|slot| (*slot).clone());
                // An ERROR parent (or one whose task died) is handed over as null
                published
                    .ok()
                    .flatten()
                    .filter(|state| state.status != Status::Error)
            }
            None => None,
        };

        let Ok(_permit) = semaphore.acquire_owned().await else {
            return self.cancelled();
        };
        self.check(parent).await
    }

    fn cancelled(&self) -> SourceState {
        warn!("{}: cancelled by run timeout", self.planned.name);
        SourceState::with_cause(
            &self.planned.source,
            self.planned.important(),
            Status::Error,
            "Cancelled: run timeout elapsed",
        )
    }

    async fn check(&self, parent: Option<Arc<SourceState>>) -> SourceState {
        let source = &self.planned.source;
        let config = match &self.planned.config {
            Ok(config) => config,
            Err(e) => return SourceState::with_cause(source, false, Status::Error, e.to_string()),
        };
        let important = config.common.is_important();
        let checker = match build_checker(&config.kind, &self.endpoints) {
            Ok(checker) => checker,
            Err(e) => return SourceState::with_cause(source, important, Status::Error, e.to_string()),
        };

        let mut ctx = CheckContext::new(self.collaborators.clone());
        ctx.parent_id = config.common.parent_id.clone();
        ctx.parent = parent;
        ctx.scheme = config.common.version_scheme;
        ctx.constraints = config.common.versions.clone();

        info!("{}: checking with {}", self.planned.name, checker.type_name());
        let result = match AssertUnwindSafe(checker.check(source, &ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!("{}: {} checker panicked", self.planned.name, checker.type_name());
                return SourceState::with_cause(
                    source,
                    important,
                    Status::Error,
                    format!("{} checker panicked: {}", checker.type_name(), panic_message(panic.as_ref())),
                );
            }
        };

        let result = match result {
            Ok(Some(new)) if self.complete_digests => {
                complete_digests(source, new, ctx.fetcher()).await.map(Some)
            }
            other => other,
        };

        let state = match result {
            Ok(new) => SourceState::checked(source, important, new, &ctx.constraints, ctx.scheme),
            Err(e) => SourceState::failed(source, important, &e),
        };
        match &state.cause {
            Some(cause) => warn!("{}: {} ({})", state.name(), state.status, cause),
            None => info!("{}: {}", state.name(), state.status),
        }
        state
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Digest kinds the manifest declares for `source`, `sha256` when it declares none
fn declared_digest_kinds(source: &ManifestSource) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    if source.digests.sha256.is_some() {
        kinds.push("sha256");
    }
    if source.digests.sha512.is_some() {
        kinds.push("sha512");
    }
    if kinds.is_empty() {
        kinds.push("sha256");
    }
    kinds
}

/// Downloads a new URL whose needed digests are unknown and verifies the ones that are
pub(crate) async fn complete_digests(
    source: &ManifestSource,
    mut new: VersionState,
    fetcher: &dyn Fetcher,
) -> Result<VersionState, CheckError> {
    let Locator::Url { url } = &new.locator else {
        return Ok(new);
    };
    let url = url.clone();
    let known = declared_digest_kinds(source).into_iter().any(|kind| match kind {
        "sha512" => new.digests.sha512.is_some(),
        _ => new.digests.sha256.is_some(),
    });
    if known {
        return Ok(new);
    }

    debug!("Downloading {} to compute its digests", url);
    let fetched = fetcher
        .fetch(&FetchRequest::get(&url))
        .await
        .map_err(|e| match e {
            // The new location being gone says nothing about the current one
            FetchError::NotFound(missing) => {
                CheckError::InvalidResponse(format!("New version {} is not downloadable", missing))
            }
            other => other.into(),
        })?;
    let hashed = digest::hash(&fetched.body);

    if let Some(mismatch) = new.digests.mismatches(&hashed.digests).into_iter().next() {
        return Err(CheckError::ChecksumMismatch {
            url,
            kind: mismatch.kind,
            expected: mismatch.expected,
            actual: mismatch.actual,
        });
    }
    new.digests = hashed.digests;
    new.size = Some(hashed.size);
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::source::Format;
    use crate::remote::digest::Digests;
    use crate::remote::fetch::{Fetched, MockFetcher};
    use crate::remote::git::{GitRef, MockGitRemote};
    use crate::remote::query::MockQueryRunner;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn collaborators(fetcher: MockFetcher, git: MockGitRemote) -> Collaborators {
        Collaborators {
            fetcher: Arc::new(fetcher),
            git: Arc::new(git),
            query: Arc::new(MockQueryRunner::new()),
        }
    }

    fn orchestrator(fetcher: MockFetcher, git: MockGitRemote, options: RunOptions) -> Orchestrator {
        Orchestrator::new(collaborators(fetcher, git), Endpoints::default(), options)
    }

    fn manifest(text: &str) -> Manifest {
        Manifest::parse(Format::Json, "org.example.App", text.to_string()).unwrap()
    }

    fn source(url: &str, sha256: Option<&str>) -> ManifestSource {
        ManifestSource {
            id: "/0".into(),
            module: "app".into(),
            kind: crate::manifest::source::SourceKind::File,
            filename: "app.tar.gz".into(),
            locator: Locator::Url { url: url.into() },
            digests: Digests {
                sha256: sha256.map(str::to_string),
                sha512: None,
            },
            size: None,
            arches: Vec::new(),
            checker_data: None,
        }
    }

    #[tokio::test]
    async fn complete_digests_downloads_when_needed() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            Ok(Fetched {
                final_url: request.url.clone(),
                body: b"hello".to_vec(),
            })
        });

        let new = complete_digests(
            &source("https://e.com/app-1.0.tar.gz", Some("old")),
            VersionState::url("https://e.com/app-2.0.tar.gz"),
            &fetcher,
        )
        .await
        .unwrap();

        assert_eq!(new.digests.sha256.as_deref(), Some(HELLO_SHA256));
        assert_eq!(new.size, Some(5));
    }

    #[tokio::test]
    async fn complete_digests_skips_known_digest() {
        let fetcher = MockFetcher::new();

        let new = complete_digests(
            &source("https://e.com/app-1.0.tar.gz", Some("old")),
            VersionState::url("https://e.com/app-2.0.tar.gz").with_digests(Digests::sha256("new")),
            &fetcher,
        )
        .await
        .unwrap();

        assert_eq!(new.digests, Digests::sha256("new"));
    }

    #[tokio::test]
    async fn complete_digests_rejects_mismatch() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|request| {
            Ok(Fetched {
                final_url: request.url.clone(),
                body: b"hello".to_vec(),
            })
        });
        let mut declared = source("https://e.com/app-1.0.tar.gz", None);
        declared.digests.sha512 = Some("old".into());

        let error = complete_digests(
            &declared,
            VersionState::url("https://e.com/app-2.0.tar.gz").with_digests(Digests::sha256("bogus")),
            &fetcher,
        )
        .await
        .unwrap_err();

        assert!(matches!(error, CheckError::ChecksumMismatch { kind: "sha256", .. }));
    }

    #[tokio::test]
    async fn run_without_checker_data_reports_nothing() {
        let report = orchestrator(MockFetcher::new(), MockGitRemote::new(), RunOptions::default())
            .run(&manifest(r#"[{"type": "file", "url": "https://e.com/a.txt", "sha256": "aa"}]"#))
            .await
            .unwrap();

        assert!(report.states.is_empty());
    }

    #[tokio::test]
    async fn run_reports_invalid_checker_data_as_error() {
        let report = orchestrator(MockFetcher::new(), MockGitRemote::new(), RunOptions::default())
            .run(&manifest(
                r#"[{"type": "file", "url": "https://e.com/a.txt", "x-checker-data": {"type": "nope"}}]"#,
            ))
            .await
            .unwrap();

        assert_eq!(report.states[0].status, Status::Error);
        assert!(report.states[0].cause.as_deref().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn run_aborts_on_duplicate_source_id() {
        let result = orchestrator(MockFetcher::new(), MockGitRemote::new(), RunOptions::default())
            .run(&manifest(
                r#"[
                    {"type": "git", "url": "https://e.com/a.git", "tag": "v1", "x-checker-data": {"type": "git", "source-id": "x"}},
                    {"type": "git", "url": "https://e.com/b.git", "tag": "v1", "x-checker-data": {"type": "git", "source-id": "x"}}
                ]"#,
            ))
            .await;

        assert!(matches!(result, Err(GraphError::DuplicateSourceId { .. })));
    }

    #[tokio::test]
    async fn run_checks_git_tag_sources() {
        let mut git = MockGitRemote::new();
        git.expect_list_refs().returning(|_| {
            Ok(vec![
                GitRef::new("refs/tags/v1.0.0", "c1"),
                GitRef::new("refs/tags/v2.0.0", "c2"),
                GitRef::new("refs/tags/v2.1.0", "c3"),
            ])
        });

        let report = orchestrator(MockFetcher::new(), git, RunOptions::default())
            .run(&manifest(
                r#"[{"type": "git", "url": "https://e.com/a.git", "tag": "v1.0.0", "commit": "c1",
                     "x-checker-data": {"type": "git", "tag-pattern": "^v([\\d.]+)$", "versions": {"<": "2.1.0"}}}]"#,
            ))
            .await
            .unwrap();

        let state = &report.states[0];
        assert_eq!(state.status, Status::Updatable);
        assert_eq!(state.new.as_ref().unwrap().version.as_deref(), Some("2.0.0"));
    }

    struct PanickingFetcher;

    #[async_trait::async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, _request: &FetchRequest) -> Result<Fetched, FetchError> {
            panic!("fetcher exploded")
        }

        async fn resolve(&self, _url: &str) -> Result<String, FetchError> {
            panic!("resolver exploded")
        }
    }

    #[tokio::test]
    async fn run_turns_panics_into_errors() {
        let collaborators = Collaborators {
            fetcher: Arc::new(PanickingFetcher),
            git: Arc::new(MockGitRemote::new()),
            query: Arc::new(MockQueryRunner::new()),
        };

        let report = Orchestrator::new(collaborators, Endpoints::default(), RunOptions::default())
            .run(&manifest(
                r#"[{"type": "file", "url": "https://e.com/latest.tgz", "sha256": "aa",
                     "x-checker-data": {"type": "rotating-url"}}]"#,
            ))
            .await
            .unwrap();

        assert_eq!(report.states[0].status, Status::Error);
        assert!(report.states[0].cause.as_deref().unwrap().contains("resolver exploded"));
    }
}
