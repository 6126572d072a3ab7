//! Collaborators that talk to the outside world
//!
//! Checkers only see these traits, so tests can swap in in-memory fakes:
//!
//! - [`fetch`]: HTTP downloads and redirect resolution
//! - [`git`]: `git ls-remote` ref listing
//! - [`query`]: `jq` evaluation
//! - [`digest`]: SHA-256/SHA-512 of downloaded content

pub mod digest;
pub mod error;
pub mod fetch;
pub mod git;
pub mod query;

pub use digest::Digests;
pub use error::{FetchError, GitError, QueryError};
pub use fetch::{FetchRequest, Fetched, Fetcher, HttpFetcher};
pub use git::{GitCli, GitRef, GitRemote};
pub use query::{JqRunner, QueryRunner};
