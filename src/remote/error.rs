use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("git ls-remote {url} failed: {stderr}")]
    Command { url: String, stderr: String },

    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query {query:?} failed: {message}")]
    Failed { query: String, message: String },

    #[error("Query {query:?} returned unusable output: {message}")]
    Output { query: String, message: String },

    #[error("Failed to run jq: {0}")]
    Io(#[from] std::io::Error),
}
