//! Remote ref listing through `git ls-remote`

use std::process::Stdio;

#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::remote::error::GitError;

const TAG_PREFIX: &str = "refs/tags/";
const HEAD_PREFIX: &str = "refs/heads/";
const PEELED_SUFFIX: &str = "^{}";

/// Stderr fragments git prints when the repository does not exist
const MISSING_REPOSITORY_MARKERS: &[&str] = &[
    "repository not found",
    "does not appear to be a git repository",
];

/// One line of `git ls-remote` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    pub name: String,
    pub commit: String,
}

impl GitRef {
    pub fn new(name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit: commit.into(),
        }
    }
}

/// Trait for listing refs of a remote repository
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait GitRemote: Send + Sync {
    /// Returns refs in the order the remote lists them
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError>;
}

/// [`GitRemote`] that shells out to the `git` binary
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait::async_trait]
impl GitRemote for GitCli {
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError> {
        debug!("git ls-remote {}", url);
        let output = Command::new(&self.program)
            .args(["ls-remote", "--", url])
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASKPASS", "true")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_missing_repository(&stderr) {
                return Err(GitError::NotFound(url.to_string()));
            }
            warn!("git ls-remote {} failed: {}", url, stderr);
            return Err(GitError::Command {
                url: url.to_string(),
                stderr,
            });
        }

        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn is_missing_repository(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    MISSING_REPOSITORY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Parses `<sha>\t<ref>` lines, skipping anything malformed
pub fn parse_ls_remote(output: &str) -> Vec<GitRef> {
    output
        .lines()
        .filter_map(|line| {
            let (commit, name) = line.split_once('\t')?;
            let commit = commit.trim();
            let name = name.trim();
            (!commit.is_empty() && !name.is_empty()).then(|| GitRef::new(name, commit))
        })
        .collect()
}

/// Tags in listing order, names without `refs/tags/`.
///
/// Annotated tags are listed twice, once for the tag object and once peeled
/// with `^{}`; the peeled entry supplies the commit.
pub fn tags(refs: &[GitRef]) -> Vec<GitRef> {
    let mut tags: Vec<GitRef> = Vec::new();
    for git_ref in refs {
        let Some(name) = git_ref.name.strip_prefix(TAG_PREFIX) else {
            continue;
        };
        if let Some(peeled) = name.strip_suffix(PEELED_SUFFIX) {
            if let Some(existing) = tags.iter_mut().find(|t| t.name == peeled) {
                existing.commit = git_ref.commit.clone();
            } else {
                tags.push(GitRef::new(peeled, git_ref.commit.clone()));
            }
        } else if !tags.iter().any(|t| t.name == name) {
            tags.push(GitRef::new(name, git_ref.commit.clone()));
        }
    }
    tags
}

/// Commit a tag resolves to
pub fn tag_commit<'a>(refs: &'a [GitRef], tag: &str) -> Option<&'a str> {
    let plain = format!("{TAG_PREFIX}{tag}");
    let peeled = format!("{plain}{PEELED_SUFFIX}");
    refs.iter()
        .find(|r| r.name == peeled)
        .or_else(|| refs.iter().find(|r| r.name == plain))
        .map(|r| r.commit.as_str())
}

/// Tip of a branch, or of `HEAD` when no branch is given
pub fn branch_tip<'a>(refs: &'a [GitRef], branch: Option<&str>) -> Option<&'a str> {
    let wanted = match branch {
        Some(branch) => format!("{HEAD_PREFIX}{branch}"),
        None => "HEAD".to_string(),
    };
    refs.iter()
        .find(|r| r.name == wanted)
        .map(|r| r.commit.as_str())
}
