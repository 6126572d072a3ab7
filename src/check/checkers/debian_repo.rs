//! Packages published in a Debian-style APT repository

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::check::checker::{CheckContext, Checker, Selection};
use crate::check::config::DebianRepoConfig;
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::digest::Digests;
use crate::remote::fetch::FetchRequest;

pub struct DebianRepoChecker {
    config: DebianRepoConfig,
}

/// Debian name of a Flatpak architecture
fn debian_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        other => other,
    }
}

/// One control-file paragraph of a `Packages` index
type Stanza = HashMap<String, String>;

/// Splits a `Packages` index into paragraphs.
///
/// Continuation lines (leading whitespace) are appended to the previous field.
fn parse_packages(index: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::new();
    let mut last_key: Option<String> = None;

    for line in index.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            last_key = None;
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if let Some(value) = last_key.as_ref().and_then(|key| current.get_mut(key)) {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            current.insert(key.trim().to_string(), value.trim().to_string());
            last_key = Some(key.trim().to_string());
        }
    }
    if !current.is_empty() {
        stanzas.push(current);
    }
    stanzas
}

impl DebianRepoChecker {
    pub fn new(config: DebianRepoConfig) -> Self {
        Self { config }
    }

    fn root(&self) -> &str {
        self.config.root.trim_end_matches('/')
    }

    /// `dists/<dist>/<component>/binary-<arch>/Packages`, or `<dist>Packages` for flat repositories
    fn index_url(&self, arch: &str) -> Result<String, ConfigError> {
        let dist = &self.config.dist;
        if dist.ends_with('/') {
            return Ok(format!("{}/{}Packages", self.root(), dist.trim_start_matches('/')));
        }
        let component = self.config.component.as_deref().ok_or_else(|| {
            ConfigError::Conflict(format!(
                "{} needs a \"component\" unless \"dist\" ends with /",
                self.config.package_name
            ))
        })?;
        Ok(format!(
            "{}/dists/{}/{}/binary-{}/Packages",
            self.root(),
            dist,
            component,
            arch
        ))
    }
}

#[async_trait]
impl Checker for DebianRepoChecker {
    fn type_name(&self) -> &'static str {
        "debian-repo"
    }

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError> {
        if source.is_git() {
            return Err(CheckError::UnsupportedSource {
                checker: self.type_name(),
                source_kind: source.kind.as_str(),
            });
        }

        let url = self.index_url(debian_arch(source.arch()))?;
        let fetched = ctx.fetcher().fetch(&FetchRequest::get(&url)).await?;
        let package = &self.config.package_name;
        let candidates: Vec<(String, Stanza)> = parse_packages(fetched.text()?)
            .into_iter()
            .filter(|stanza| stanza.get("Package") == Some(package))
            .filter_map(|stanza| Some((stanza.get("Version")?.clone(), stanza)))
            .collect();
        if candidates.is_empty() {
            return Err(CheckError::InvalidResponse(format!("{} is not in {}", package, url)));
        }

        let Some(latest) = ctx.select(candidates, Selection::Greatest) else {
            debug!("{}: no suitable version of {}", source.display_name(), package);
            return Ok(None);
        };
        let filename = latest
            .item
            .get("Filename")
            .ok_or_else(|| CheckError::InvalidResponse(format!("{} {} has no Filename", package, latest.version)))?;
        let digests = latest
            .item
            .get("SHA256")
            .map(|sha256| Digests::sha256(sha256.clone()))
            .unwrap_or_default();
        let size = latest.item.get("Size").and_then(|size| size.parse().ok());

        Ok(Some(
            VersionState::url(format!("{}/{}", self.root(), filename.trim_start_matches('/')))
                .with_version(latest.version.to_string())
                .with_digests(digests)
                .with_size(size),
        ))
    }
}
