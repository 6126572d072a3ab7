//! Python packages published on PyPI

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pep508_rs::pep440_rs::Version;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::check::checker::{CheckContext, Checker};
use crate::check::checkers::json::parse_timestamp;
use crate::check::config::PypiConfig;
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::digest::Digests;
use crate::remote::fetch::FetchRequest;
use crate::version::VersionValue;

/// `python_version` values of files usable on any Python 3
const PORTABLE_PYTHON_VERSIONS: &[&str] = &["source", "py3", "py2.py3"];

pub struct PypiChecker {
    config: PypiConfig,
    base_url: String,
}

impl PypiChecker {
    pub fn new(config: PypiConfig, base_url: &str) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn accepts_version(&self, version: &str, ctx: &CheckContext) -> bool {
        if self.config.stable_only && is_prerelease(version) {
            return false;
        }
        if ctx.constraints.is_empty() {
            return true;
        }
        VersionValue::parse(version, ctx.scheme)
            .map(|value| ctx.constraints.matches(&value))
            .unwrap_or(false)
    }

    fn accepts_file(&self, file: &PypiFile) -> bool {
        file.packagetype == self.config.packagetype
            && PORTABLE_PYTHON_VERSIONS.contains(&file.python_version.as_str())
    }
}

/// PEP 440 pre-releases; unparseable versions count as pre-releases
fn is_prerelease(version: &str) -> bool {
    Version::from_str(version)
        .map(|parsed| parsed.any_prerelease())
        .unwrap_or(true)
}

/// PyPI JSON API response structure
#[derive(Debug, Deserialize)]
struct PypiResponse {
    info: PypiInfo,
    #[serde(default)]
    releases: HashMap<String, Vec<PypiFile>>,
    #[serde(default)]
    urls: Vec<PypiFile>,
}

#[derive(Debug, Deserialize)]
struct PypiInfo {
    version: String,
}

/// One downloadable file of a release
#[derive(Debug, Clone, Deserialize)]
struct PypiFile {
    packagetype: String,
    python_version: String,
    url: String,
    #[serde(default)]
    digests: PypiDigests,
    size: Option<u64>,
    upload_time_iso_8601: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PypiDigests {
    sha256: Option<String>,
}

#[async_trait]
impl Checker for PypiChecker {
    fn type_name(&self) -> &'static str {
        "pypi"
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

        let url = format!("{}/{}/json", self.base_url, self.config.name);
        let response: PypiResponse = ctx.fetcher().fetch(&FetchRequest::get(url)).await?.json()?;

        // Only the latest release unless older ones might be wanted
        let releases = if ctx.constraints.is_empty() && !self.config.stable_only {
            HashMap::from([(response.info.version, response.urls)])
        } else {
            response.releases
        };

        let mut downloads: Vec<(DateTime<Utc>, String, PypiFile)> = Vec::new();
        for (version, files) in releases {
            if !self.accepts_version(&version, ctx) {
                continue;
            }
            for file in files.into_iter().filter(|file| self.accepts_file(file)) {
                match parse_timestamp(&file.upload_time_iso_8601) {
                    Ok(uploaded) => downloads.push((uploaded, version.clone(), file)),
                    Err(e) => warn!("Skipping {}: {}", file.url, e),
                }
            }
        }

        let Some((uploaded, version, file)) = downloads.into_iter().max_by_key(|(uploaded, ..)| *uploaded)
        else {
            debug!(
                "{}: no {} download for {}",
                source.display_name(),
                self.config.packagetype,
                self.config.name
            );
            return Ok(None);
        };

        let digests = file.digests.sha256.map(Digests::sha256).unwrap_or_default();
        Ok(Some(
            VersionState::url(file.url)
                .with_version(version)
                .with_digests(digests)
                .with_size(file.size)
                .with_timestamp(Some(uploaded)),
        ))
    }
}
