//! Release Monitoring (Anitya) project versions

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::check::checker::{CheckContext, Checker, Selection};
use crate::check::checkers::json::version_vars;
use crate::check::config::AnityaConfig;
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::VersionState;
use crate::manifest::source::{Locator, ManifestSource};
use crate::remote::fetch::FetchRequest;
use crate::remote::git;
use crate::version::expand;

pub struct AnityaChecker {
    config: AnityaConfig,
    base_url: String,
}

impl AnityaChecker {
    pub fn new(config: AnityaConfig, default_base_url: &str) -> Self {
        let base_url = config
            .baseurl
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn latest_version(&self, versions: ProjectVersions, ctx: &CheckContext) -> Option<String> {
        if !self.config.stable_only && ctx.constraints.is_empty() {
            return versions.latest_version;
        }
        let listed = if self.config.stable_only {
            versions.stable_versions
        } else {
            versions.versions
        };
        // Anitya lists newest first
        ctx.select(listed.into_iter().map(|v| (v, ())), Selection::First)
            .map(|selected| selected.version.to_string())
    }
}

/// Response of `/api/v2/versions/`
#[derive(Debug, Deserialize)]
struct ProjectVersions {
    latest_version: Option<String>,
    #[serde(default)]
    versions: Vec<String>,
    #[serde(default)]
    stable_versions: Vec<String>,
}

#[async_trait]
impl Checker for AnityaChecker {
    fn type_name(&self) -> &'static str {
        "anitya"
    }

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError> {
        let url = format!(
            "{}/api/v2/versions/?project_id={}",
            self.base_url, self.config.project_id
        );
        let versions: ProjectVersions = ctx.fetcher().fetch(&FetchRequest::get(url)).await?.json()?;

        let Some(version) = self.latest_version(versions, ctx) else {
            debug!("{}: no suitable version", source.display_name());
            return Ok(None);
        };
        let vars = version_vars(&version, ctx.scheme);

        match &source.locator {
            Locator::Git { url, .. } => {
                let template = self.config.tag_template.as_deref().ok_or_else(|| {
                    ConfigError::Conflict("anitya checker needs \"tag-template\" for git sources".into())
                })?;
                let tag = expand(template, &vars)?;
                let refs = ctx.git().list_refs(url).await?;
                let commit = git::tag_commit(&refs, &tag)
                    .ok_or_else(|| CheckError::InvalidResponse(format!("Tag {} not found in {}", tag, url)))?
                    .to_string();
                Ok(Some(
                    VersionState::git(url.clone(), Some(tag), Some(commit), None).with_version(version),
                ))
            }
            Locator::Url { .. } => {
                let template = self.config.url_template.as_deref().ok_or_else(|| {
                    ConfigError::Conflict("anitya checker needs \"url-template\"".into())
                })?;
                let url = expand(template, &vars)?;
                Ok(Some(VersionState::url(url).with_version(version)))
            }
        }
    }
}
