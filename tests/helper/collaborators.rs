//! In-memory collaborators

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use external_data_checker::remote::{
    FetchError, FetchRequest, Fetched, Fetcher, GitError, GitRef, GitRemote, QueryError,
    QueryRunner,
};

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
enum Response {
    Body(Vec<u8>),
    Status(u16),
}

/// Serves canned pages and redirects, recording every requested URL
#[derive(Default)]
pub struct FakeFetcher {
    responses: HashMap<String, Response>,
    redirects: HashMap<String, String>,
    delay: Option<Duration>,
    slow_urls: HashMap<String, Duration>,
    requests: Mutex<Vec<String>>,
    timeline: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses
            .insert(url.to_string(), Response::Body(body.into()));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses
            .insert(url.to_string(), Response::Status(status));
        self
    }

    pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    /// Every request sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests for `url` sleep this long, overriding [`Self::with_delay`]
    pub fn with_slow_url(mut self, url: &str, delay: Duration) -> Self {
        self.slow_urls.insert(url.to_string(), delay);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// `> url` when a request starts, `< url` when it is answered
    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().unwrap().clone()
    }

    /// Most requests ever waiting for an answer at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn begin(&self, url: &str) -> String {
        self.requests.lock().unwrap().push(url.to_string());
        self.timeline.lock().unwrap().push(format!("> {url}"));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.slow_urls.get(url).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.timeline.lock().unwrap().push(format!("< {url}"));
        let mut current = url.to_string();
        for _ in 0..MAX_REDIRECTS {
            match self.redirects.get(&current) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
        current
    }

    fn status_error(url: &str, status: u16) -> FetchError {
        match status {
            404 | 410 => FetchError::NotFound(url.to_string()),
            429 => FetchError::RateLimited {
                retry_after_secs: None,
            },
            _ => FetchError::Status {
                status,
                url: url.to_string(),
            },
        }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, FetchError> {
        let final_url = self.begin(&request.url).await;
        match self.responses.get(&final_url) {
            Some(Response::Body(body)) => Ok(Fetched {
                final_url,
                body: body.clone(),
            }),
            Some(Response::Status(status)) => Err(Self::status_error(&final_url, *status)),
            None => Err(FetchError::NotFound(final_url)),
        }
    }

    async fn resolve(&self, url: &str) -> Result<String, FetchError> {
        let final_url = self.begin(url).await;
        match self.responses.get(&final_url) {
            Some(Response::Status(status)) => Err(Self::status_error(&final_url, *status)),
            _ => Ok(final_url),
        }
    }
}

/// Ref listings per repository URL; unknown repositories do not exist
#[derive(Default)]
pub struct FakeGit {
    repositories: HashMap<String, Vec<GitRef>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// `refs` are `(ref name, commit)` pairs in listing order
    pub fn with_refs(mut self, url: &str, refs: &[(&str, &str)]) -> Self {
        self.repositories.insert(
            url.to_string(),
            refs.iter()
                .map(|(name, commit)| GitRef::new(*name, *commit))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl GitRemote for FakeGit {
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError> {
        self.repositories
            .get(url)
            .cloned()
            .ok_or_else(|| GitError::NotFound(url.to_string()))
    }
}

/// Evaluates plain paths only: `.a.b` against the input, `$name.a.b` against a variable
pub struct FakeQuery;

impl FakeQuery {
    fn walk<'a>(mut value: &'a Value, path: &str) -> Option<&'a Value> {
        for key in path.split('.').filter(|key| !key.is_empty()) {
            value = value.get(key)?;
        }
        Some(value)
    }
}

#[async_trait]
impl QueryRunner for FakeQuery {
    async fn run(
        &self,
        query: &str,
        input: &Value,
        vars: &Map<String, Value>,
    ) -> Result<Value, QueryError> {
        let failed = |message: &str| QueryError::Failed {
            query: query.to_string(),
            message: message.to_string(),
        };

        let found = match query.strip_prefix('$') {
            Some(rest) => {
                let (name, path) = rest.split_once('.').unwrap_or((rest, ""));
                let root = vars.get(name).ok_or_else(|| failed("unknown variable"))?;
                Self::walk(root, path)
            }
            None => Self::walk(input, query),
        };
        found
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| failed("no value"))
    }
}
