//! Snaps published in the Snap Store

use async_trait::async_trait;
use serde::Deserialize;

use crate::check::checker::{CheckContext, Checker};
use crate::check::checkers::json::parse_timestamp;
use crate::check::config::SnapcraftConfig;
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::fetch::FetchRequest;

const DEVICE_SERIES: &str = "16";

pub struct SnapcraftChecker {
    config: SnapcraftConfig,
    base_url: String,
}

impl SnapcraftChecker {
    pub fn new(config: SnapcraftConfig, base_url: &str) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Snap Store name of a Flatpak architecture
fn snap_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" => Some("amd64"),
        "aarch64" => Some("arm64"),
        "arm" => Some("armhf"),
        "i386" => Some("i386"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct SnapInfo {
    #[serde(rename = "channel-map")]
    channel_map: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    channel: Channel,
    download: SnapDownload,
    version: String,
}

#[derive(Debug, Deserialize)]
struct Channel {
    architecture: String,
    name: String,
    #[serde(rename = "released-at")]
    released_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapDownload {
    url: String,
    size: Option<u64>,
}

#[async_trait]
impl Checker for SnapcraftChecker {
    fn type_name(&self) -> &'static str {
        "snapcraft"
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
        let arch = snap_arch(source.arch()).ok_or_else(|| {
            CheckError::InvalidResponse(format!("No snap architecture for {}", source.arch()))
        })?;

        let request = FetchRequest::get(format!("{}/v2/snaps/info/{}", self.base_url, self.config.name))
            .header("Snap-Device-Series", DEVICE_SERIES);
        let info: SnapInfo = ctx.fetcher().fetch(&request).await?.json()?;

        let entry = info
            .channel_map
            .into_iter()
            .find(|entry| entry.channel.architecture == arch && entry.channel.name == self.config.channel)
            .ok_or_else(|| {
                CheckError::InvalidResponse(format!(
                    "{} has no {} channel for {}",
                    self.config.name, self.config.channel, arch
                ))
            })?;
        let timestamp = entry
            .channel
            .released_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Ok(Some(
            VersionState::url(entry.download.url)
                .with_version(entry.version)
                .with_size(entry.download.size)
                .with_timestamp(timestamp),
        ))
    }
}
