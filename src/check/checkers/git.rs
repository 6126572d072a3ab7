//! Git sources tracked through their remote refs

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::check::checker::{CheckContext, Checker, Selection};
use crate::check::config::{GitConfig, compile_pattern};
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::VersionState;
use crate::manifest::source::{Locator, ManifestSource};
use crate::remote::git::{self, GitRef};

pub struct GitChecker {
    tag_pattern: Option<Regex>,
    sort_tags: bool,
}

impl GitChecker {
    pub fn new(config: &GitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            tag_pattern: config
                .tag_pattern
                .as_deref()
                .map(|pattern| compile_pattern(pattern, Some(1)))
                .transpose()?,
            sort_tags: config.sort_tags,
        })
    }

    /// Newest tag matching `pattern`; `Ok(None)` when every match fails the constraints
    fn latest_tag(
        &self,
        pattern: &Regex,
        url: &str,
        refs: &[GitRef],
        ctx: &CheckContext,
    ) -> Result<Option<(String, GitRef)>, CheckError> {
        let candidates: Vec<(String, GitRef)> = git::tags(refs)
            .into_iter()
            .filter_map(|tag| {
                let version = pattern.captures(&tag.name)?.get(1)?.as_str().to_string();
                Some((version, tag))
            })
            .collect();
        if candidates.is_empty() {
            return Err(CheckError::InvalidResponse(format!(
                "{} has no tags matching {}",
                url,
                pattern.as_str()
            )));
        }
        // Unsorted, the most recently listed tag wins
        let selection = if self.sort_tags {
            Selection::Greatest
        } else {
            Selection::Last
        };
        Ok(ctx
            .select(candidates, selection)
            .map(|selected| (selected.version.to_string(), selected.item)))
    }
}

#[async_trait]
impl Checker for GitChecker {
    fn type_name(&self) -> &'static str {
        "git"
    }

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError> {
        let Locator::Git {
            url,
            branch,
            tag,
            commit,
        } = &source.locator
        else {
            return Err(CheckError::UnsupportedSource {
                checker: self.type_name(),
                source_kind: source.kind.as_str(),
            });
        };

        if let Some(pattern) = &self.tag_pattern {
            let refs = ctx.git().list_refs(url).await?;
            let Some((version, latest)) = self.latest_tag(pattern, url, &refs, ctx)? else {
                debug!("{}: no matching tag passes the constraints", source.display_name());
                return Ok(None);
            };
            return Ok(Some(
                VersionState::git(url.clone(), Some(latest.name), Some(latest.commit), None)
                    .with_version(version),
            ));
        }

        match (branch, tag) {
            (Some(branch), _) => {
                let refs = ctx.git().list_refs(url).await?;
                let tip = git::branch_tip(&refs, Some(branch))
                    .ok_or_else(|| CheckError::Missing(format!("Branch {} not found in {}", branch, url)))?;
                Ok(Some(VersionState::git(
                    url.clone(),
                    None,
                    Some(tip.to_string()),
                    Some(branch.clone()),
                )))
            }
            (None, Some(tag)) => {
                let refs = ctx.git().list_refs(url).await?;
                let tagged = git::tag_commit(&refs, tag)
                    .ok_or_else(|| CheckError::Missing(format!("Tag {} not found in {}", tag, url)))?;
                if commit.as_deref().is_some_and(|commit| commit != tagged) {
                    debug!("{}: tag {} moved to {}", source.display_name(), tag, tagged);
                }
                Ok(Some(VersionState::git(
                    url.clone(),
                    Some(tag.clone()),
                    Some(tagged.to_string()),
                    None,
                )))
            }
            (None, None) => {
                debug!("{}: pinned to a commit, nothing to track", source.display_name());
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::check::checkers::test_support::{context_with, git_source, url_source};
    use crate::remote::error::GitError;
    use crate::remote::fetch::MockFetcher;
    use crate::remote::git::MockGitRemote;
    use crate::remote::query::MockQueryRunner;
    use crate::version::{ConstraintSet, Operator};
    use rstest::rstest;

    fn context(refs: Vec<GitRef>) -> CheckContext {
        let mut git = MockGitRemote::new();
        git.expect_list_refs()
            .returning(move |_| Ok(refs.clone()));
        context_with(
            Arc::new(MockFetcher::new()),
            Arc::new(git),
            Arc::new(MockQueryRunner::new()),
        )
    }

    fn release_refs() -> Vec<GitRef> {
        vec![
            GitRef::new("HEAD", "head0"),
            GitRef::new("refs/heads/main", "head0"),
            GitRef::new("refs/tags/v1.0.0", "c100"),
            GitRef::new("refs/tags/v2.1.0", "t210"),
            GitRef::new("refs/tags/v2.1.0^{}", "c210"),
            GitRef::new("refs/tags/v2.0.0", "c200"),
            GitRef::new("refs/tags/nightly", "cnig"),
        ]
    }

    fn tag_checker(sort_tags: bool) -> GitChecker {
        GitChecker::new(&GitConfig {
            tag_pattern: Some(r"^v([\d.]+)$".to_string()),
            sort_tags,
        })
        .unwrap()
    }

    #[rstest]
    #[case(true, "v2.1.0", "c210")]
    #[case(false, "v2.0.0", "c200")]
    #[tokio::test]
    async fn check_tag_pattern_selects_tag(
        #[case] sort_tags: bool,
        #[case] expected_tag: &str,
        #[case] expected_commit: &str,
    ) {
        let state = tag_checker(sort_tags)
            .check(&git_source(None, Some("v1.0.0"), Some("c100")), &context(release_refs()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            state.locator,
            Locator::Git {
                url: "https://git.example.com/app.git".to_string(),
                branch: None,
                tag: Some(expected_tag.to_string()),
                commit: Some(expected_commit.to_string()),
            }
        );
        assert_eq!(state.version.as_deref(), Some(&expected_tag[1..]));
    }

    #[tokio::test]
    async fn check_tag_pattern_respects_constraints() {
        let mut ctx = context(release_refs());
        ctx.constraints = ConstraintSet::new([(Operator::Less, "2.1.0".to_string())]);

        let state = tag_checker(true)
            .check(&git_source(None, Some("v1.0.0"), Some("c100")), &ctx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.version.as_deref(), Some("2.0.0"));
        assert!(matches!(state.locator, Locator::Git { tag: Some(ref t), .. } if t == "v2.0.0"));
    }

    #[tokio::test]
    async fn check_tag_pattern_without_any_match_is_an_error() {
        let checker = GitChecker::new(&GitConfig {
            tag_pattern: Some(r"^release-([\d.]+)$".to_string()),
            sort_tags: true,
        })
        .unwrap();
        let source = git_source(None, Some("v1.0.0"), Some("c100"));

        let error = checker
            .check(&source, &context(release_refs()))
            .await
            .unwrap_err();

        assert!(matches!(error, CheckError::InvalidResponse(ref message) if message.contains("no tags matching")));
        assert!(!error.is_confirmed_absent(&source.locator));
    }

    #[tokio::test]
    async fn check_tag_pattern_with_all_matches_excluded_finds_nothing() {
        let mut ctx = context(release_refs());
        ctx.constraints = ConstraintSet::new([(Operator::Less, "1.0.0".to_string())]);

        let state = tag_checker(true)
            .check(&git_source(None, Some("v1.0.0"), Some("c100")), &ctx)
            .await
            .unwrap();

        assert_eq!(state, None);
    }

    #[tokio::test]
    async fn check_branch_tracks_tip() {
        let checker = GitChecker::new(&GitConfig::default()).unwrap();

        let state = checker
            .check(&git_source(Some("main"), None, Some("old")), &context(release_refs()))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(state.locator, Locator::Git { commit: Some(ref c), .. } if c == "head0"));
    }

    #[rstest]
    #[case(git_source(Some("release-9"), None, None))]
    #[case(git_source(None, Some("v9.9.9"), Some("c999")))]
    #[tokio::test]
    async fn check_missing_ref_is_confirmed_absent(#[case] source: ManifestSource) {
        let checker = GitChecker::new(&GitConfig::default()).unwrap();

        let error = checker
            .check(&source, &context(release_refs()))
            .await
            .unwrap_err();

        assert!(error.is_confirmed_absent(&source.locator));
    }

    #[tokio::test]
    async fn check_commit_only_source_is_left_alone() {
        let checker = GitChecker::new(&GitConfig::default()).unwrap();
        let ctx = context_with(
            Arc::new(MockFetcher::new()),
            Arc::new(MockGitRemote::new()),
            Arc::new(MockQueryRunner::new()),
        );

        let result = checker
            .check(&git_source(None, None, Some("c100")), &ctx)
            .await
            .unwrap();

        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn check_propagates_missing_repository() {
        let mut git = MockGitRemote::new();
        git.expect_list_refs()
            .returning(|url| Err(GitError::NotFound(url.to_string())));
        let ctx = context_with(
            Arc::new(MockFetcher::new()),
            Arc::new(git),
            Arc::new(MockQueryRunner::new()),
        );

        let error = tag_checker(true)
            .check(&git_source(None, Some("v1.0.0"), None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(error, CheckError::Git(GitError::NotFound(_))));
    }

    #[tokio::test]
    async fn check_rejects_url_sources() {
        let result = tag_checker(true)
            .check(&url_source("https://e.com/a.tgz"), &context(Vec::new()))
            .await;

        assert!(matches!(result, Err(CheckError::UnsupportedSource { .. })));
    }
}
