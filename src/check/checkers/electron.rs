//! Apps published with electron-updater `latest-linux.yml` metadata

use async_trait::async_trait;
use serde_json::Value;

use crate::check::checker::{CheckContext, Checker};
use crate::check::checkers::join_url;
use crate::check::checkers::json::parse_timestamp;
use crate::check::config::ElectronConfig;
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::manifest::yaml;
use crate::remote::digest::{Digests, base64_to_hex};
use crate::remote::fetch::FetchRequest;

const METADATA_FILE: &str = "latest-linux.yml";

pub struct ElectronChecker {
    config: ElectronConfig,
}

impl ElectronChecker {
    pub fn new(config: ElectronConfig) -> Self {
        Self { config }
    }
}

fn read_digests(entry: &Value) -> Result<Digests, CheckError> {
    let decode = |kind: &str| -> Result<Option<String>, CheckError> {
        entry
            .get(kind)
            .and_then(Value::as_str)
            .map(|encoded| {
                base64_to_hex(encoded)
                    .ok_or_else(|| CheckError::InvalidResponse(format!("Invalid base64 {}", kind)))
            })
            .transpose()
    };
    Ok(Digests {
        sha256: decode("sha256")?,
        sha512: decode("sha512")?,
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Checker for ElectronChecker {
    fn type_name(&self) -> &'static str {
        "electron-updater"
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

        let metadata_url = match &self.config.url {
            Some(url) => url.clone(),
            None => join_url(source.locator.url(), METADATA_FILE),
        };
        let fetched = ctx.fetcher().fetch(&FetchRequest::get(&metadata_url)).await?;
        let metadata = yaml::parse(fetched.text()?)
            .map_err(|e| CheckError::InvalidResponse(format!("{}: {}", metadata_url, e)))?
            .to_json();
        let missing = |field: &str| CheckError::InvalidResponse(format!("{} has no {}", metadata_url, field));

        // electron-updater 1.x has a top-level `path` and no size
        let (path, size, digests) = match metadata.get("files").and_then(|files| files.get(0)) {
            Some(file) => (
                file.get("url").and_then(Value::as_str).ok_or_else(|| missing("files[0].url"))?,
                file.get("size").and_then(Value::as_u64),
                read_digests(file)?,
            ),
            None => (
                metadata.get("path").and_then(Value::as_str).ok_or_else(|| missing("path"))?,
                None,
                read_digests(&metadata)?,
            ),
        };

        let version = metadata
            .get("version")
            .and_then(scalar_string)
            .ok_or_else(|| missing("version"))?;
        let timestamp = metadata
            .get("releaseDate")
            .and_then(Value::as_str)
            .map(parse_timestamp)
            .transpose()?;

        Ok(Some(
            VersionState::url(join_url(&fetched.final_url, path))
                .with_version(version)
                .with_digests(digests)
                .with_size(size)
                .with_timestamp(timestamp),
        ))
    }
}
