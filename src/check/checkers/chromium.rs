//! Chromium release tarballs and the LLVM toolchain pinned by each release

use std::sync::LazyLock;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::check::checker::{CheckContext, Checker};
use crate::check::config::{ChromiumComponent, ChromiumConfig};
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::config::Endpoints;
use crate::manifest::source::ManifestSource;
use crate::remote::error::FetchError;
use crate::remote::fetch::FetchRequest;

static CLANG_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CLANG_REVISION = '(.*)'").expect("valid revision regex"));
static CLANG_SUB_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CLANG_SUB_REVISION = (\d+)").expect("valid sub-revision regex"));

pub struct ChromiumChecker {
    config: ChromiumConfig,
    dash_url: String,
    source_url: String,
    storage_url: String,
    mirror_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    version: String,
}

/// Clang build pinned by `tools/clang/scripts/update.py`
#[derive(Debug, Clone, PartialEq, Eq)]
struct LlvmVersion {
    revision: String,
    sub_revision: String,
}

impl ChromiumChecker {
    pub fn new(config: ChromiumConfig, endpoints: &Endpoints) -> Self {
        let trimmed = |url: &str| url.trim_end_matches('/').to_string();
        Self {
            config,
            dash_url: trimmed(&endpoints.chromium_dash),
            source_url: trimmed(&endpoints.chromium_source),
            storage_url: trimmed(&endpoints.chromium_storage),
            mirror_url: trimmed(&endpoints.chromium_mirror),
        }
    }

    async fn latest_chromium(&self, ctx: &CheckContext) -> Result<String, CheckError> {
        let url = format!(
            "{}/fetch_releases?platform=Linux&channel=Stable&num=1",
            self.dash_url
        );
        let releases: Vec<Release> = ctx.fetcher().fetch(&FetchRequest::get(url)).await?.json()?;
        releases
            .into_iter()
            .next()
            .map(|release| release.version)
            .ok_or_else(|| CheckError::InvalidResponse("No stable Chromium release".to_string()))
    }

    async fn llvm_version(&self, ctx: &CheckContext, chromium: &str) -> Result<LlvmVersion, CheckError> {
        let url = format!(
            "{}/chromium/src/+/{}/tools/clang/scripts/update.py?format=TEXT",
            self.source_url, chromium
        );
        let fetched = ctx.fetcher().fetch(&FetchRequest::get(&url)).await?;
        let decoded = STANDARD
            .decode(fetched.text()?.trim())
            .map_err(|e| CheckError::InvalidResponse(format!("{}: {}", url, e)))?;
        parse_update_py(&String::from_utf8_lossy(&decoded))
            .ok_or_else(|| CheckError::InvalidResponse(format!("{} does not pin a clang revision", url)))
    }

    /// Official tarball, or the Gentoo mirror when it is missing
    async fn tarball_url(&self, ctx: &CheckContext, version: &str) -> Result<String, CheckError> {
        let official = format!(
            "{}/chromium-browser-official/chromium-{}.tar.xz",
            self.storage_url, version
        );
        match ctx.fetcher().resolve(&official).await {
            Ok(url) => Ok(url),
            Err(FetchError::NotFound(_)) => {
                warn!("Chromium {} tarball is missing, falling back to mirror", version);
                let mirror = format!("{}/chromium-{}.tar.xz", self.mirror_url, version);
                Ok(ctx.fetcher().resolve(&mirror).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn expect_kind(&self, source: &ManifestSource, git: bool) -> Result<(), CheckError> {
        if source.is_git() == git {
            return Ok(());
        }
        Err(CheckError::UnsupportedSource {
            checker: self.type_name(),
            source_kind: source.kind.as_str(),
        })
    }
}

fn parse_update_py(script: &str) -> Option<LlvmVersion> {
    let revision = CLANG_REVISION.captures(script)?.get(1)?.as_str();
    let sub_revision = CLANG_SUB_REVISION.captures(script)?.get(1)?.as_str();
    Some(LlvmVersion {
        revision: revision.to_string(),
        sub_revision: sub_revision.to_string(),
    })
}

#[async_trait]
impl Checker for ChromiumChecker {
    fn type_name(&self) -> &'static str {
        "chromium"
    }

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError> {
        self.expect_kind(source, self.config.component == ChromiumComponent::LlvmGit)?;

        let chromium = self.latest_chromium(ctx).await?;
        debug!("{}: latest stable Chromium is {}", source.display_name(), chromium);

        let state = match self.config.component {
            ChromiumComponent::Chromium => {
                VersionState::url(self.tarball_url(ctx, &chromium).await?)
            }
            ChromiumComponent::LlvmGit => {
                let llvm = self.llvm_version(ctx, &chromium).await?;
                VersionState::git(source.locator.url(), None, Some(llvm.revision), None)
            }
            ChromiumComponent::LlvmPrebuilt => {
                let llvm = self.llvm_version(ctx, &chromium).await?;
                VersionState::url(format!(
                    "{}/chromium-browser-clang/Linux_x64/clang-{}-{}.tar.xz",
                    self.storage_url, llvm.revision, llvm.sub_revision
                ))
            }
        };

        Ok(Some(state.with_version(chromium)))
    }
}
