//! JetBrains IDE releases from `data.services.jetbrains.com`

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::debug;

use crate::check::checker::{CheckContext, Checker};
use crate::check::config::JetbrainsConfig;
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::digest::Digests;
use crate::remote::fetch::FetchRequest;

pub struct JetbrainsChecker {
    config: JetbrainsConfig,
    base_url: String,
}

impl JetbrainsChecker {
    pub fn new(config: JetbrainsConfig, base_url: &str) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    version: String,
    date: String,
    downloads: HashMap<String, Download>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Download {
    link: String,
    size: Option<u64>,
    checksum_link: Option<String>,
}

#[async_trait]
impl Checker for JetbrainsChecker {
    fn type_name(&self) -> &'static str {
        "jetbrains"
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

        let code = &self.config.code;
        let url = format!(
            "{}/products/releases?code={}&latest=true&type={}",
            self.base_url, code, self.config.release_type
        );
        let mut products: HashMap<String, Vec<Release>> =
            ctx.fetcher().fetch(&FetchRequest::get(url)).await?.json()?;

        let release = products
            .remove(code)
            .and_then(|releases| releases.into_iter().next())
            .ok_or_else(|| CheckError::InvalidResponse(format!("No {} release of {}", self.config.release_type, code)))?;
        let Some(download) = release.downloads.get("linux") else {
            debug!("{}: {} has no linux download", source.display_name(), code);
            return Ok(None);
        };

        let digests = match &download.checksum_link {
            Some(link) => {
                let checksum = ctx.fetcher().fetch(&FetchRequest::get(link)).await?;
                // `<sha256> *<file name>`
                checksum
                    .text()?
                    .split_whitespace()
                    .next()
                    .map(Digests::sha256)
                    .unwrap_or_default()
            }
            None => Digests::default(),
        };
        let timestamp = NaiveDate::parse_from_str(&release.date, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());

        Ok(Some(
            VersionState::url(download.link.clone())
                .with_version(release.version)
                .with_digests(digests)
                .with_size(download.size)
                .with_timestamp(timestamp),
        ))
    }
}
