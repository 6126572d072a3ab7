//! GNOME tarballs listed in `download.gnome.org` cache files

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::check::checker::{CheckContext, Checker, Selection};
use crate::check::config::GnomeConfig;
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::fetch::FetchRequest;

/// First major release using even/odd-free version numbers
const NEW_SCHEME_MAJOR: u64 = 40;

const UNSTABLE_MARKERS: &[&str] = &["alpha", "beta", "rc"];

const TARBALL_FORMATS: &[&str] = &["tar.xz", "tar.bz2", "tar.gz"];

pub struct GnomeChecker {
    config: GnomeConfig,
    base_url: String,
}

impl GnomeChecker {
    pub fn new(config: GnomeConfig, base_url: &str) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn sources_url(&self) -> String {
        format!("{}/sources/{}", self.base_url, self.config.name)
    }
}

/// Odd minor versions before 40, and alpha/beta/rc releases, are development snapshots
fn is_stable(version: &str) -> bool {
    let lowered = version.to_lowercase();
    if UNSTABLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return false;
    }
    let mut parts = version.split('.').map(|part| part.parse::<u64>().ok());
    match (parts.next().flatten(), parts.next().flatten()) {
        (Some(major), Some(minor)) if major < NEW_SCHEME_MAJOR => minor % 2 == 0,
        _ => true,
    }
}

/// Versions and tarball paths from `cache.json`.
///
/// The file is `[format, {name: {version: {ext: path}}}, {name: [versions]}, ...]`.
fn releases(cache: &Value, name: &str) -> Result<Vec<(String, String)>, CheckError> {
    let invalid = || CheckError::InvalidResponse(format!("Unexpected cache.json layout for {}", name));
    let files = cache.get(1).and_then(|files| files.get(name)).ok_or_else(invalid)?;
    let versions = cache
        .get(2)
        .and_then(|versions| versions.get(name))
        .and_then(Value::as_array)
        .ok_or_else(invalid)?;

    Ok(versions
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|version| {
            let formats = files.get(version)?;
            let path = TARBALL_FORMATS
                .iter()
                .find_map(|format| formats.get(*format).and_then(Value::as_str))?;
            Some((version.to_string(), path.to_string()))
        })
        .collect())
}

#[async_trait]
impl Checker for GnomeChecker {
    fn type_name(&self) -> &'static str {
        "gnome"
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

        let url = format!("{}/cache.json", self.sources_url());
        let cache: Value = ctx.fetcher().fetch(&FetchRequest::get(url)).await?.json()?;
        let candidates = releases(&cache, &self.config.name)?
            .into_iter()
            .filter(|(version, _)| !self.config.stable_only || is_stable(version));

        let Some(latest) = ctx.select(candidates, Selection::Greatest) else {
            debug!("{}: no suitable version of {}", source.display_name(), self.config.name);
            return Ok(None);
        };
        let url = format!("{}/{}", self.sources_url(), latest.item);

        Ok(Some(VersionState::url(url).with_version(latest.version.to_string())))
    }
}
