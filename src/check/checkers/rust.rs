//! Rust toolchain components from the `static.rust-lang.org` channel manifests

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

use crate::check::checker::{CheckContext, Checker};
use crate::check::config::{RustChannel, RustConfig};
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::digest::Digests;
use crate::remote::fetch::FetchRequest;

/// `1.77.0 (aedd173a2 2024-03-17)`
static PACKAGE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+\((\S+)\s+(\S+)\)").expect("valid package version regex")
});

pub struct RustChecker {
    config: RustConfig,
    base_url: String,
}

impl RustChecker {
    pub fn new(config: RustConfig, base_url: &str) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// String and boolean values of a channel manifest keyed by table path.
///
/// Top-level keys live under the empty table name.
type Tables = HashMap<String, HashMap<String, String>>;

fn parse_channel(content: &str) -> Result<Tables, CheckError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_toml_ng::LANGUAGE.into())
        .map_err(|e| {
            warn!("Failed to set TOML language for tree-sitter: {}", e);
            CheckError::InvalidResponse(e.to_string())
        })?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| CheckError::InvalidResponse("Failed to parse channel TOML".to_string()))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(CheckError::InvalidResponse(
            "Channel manifest is not valid TOML".to_string(),
        ));
    }

    let mut tables = Tables::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "pair" => read_pair(child, content, tables.entry(String::new()).or_default()),
            "table" => {
                let Some(header) = child.named_child(0) else {
                    continue;
                };
                let name = key_path(&content[header.byte_range()]);
                let values = tables.entry(name).or_default();
                let mut table_cursor = child.walk();
                for pair in child.named_children(&mut table_cursor) {
                    if pair.kind() == "pair" {
                        read_pair(pair, content, values);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(tables)
}

fn read_pair(pair: tree_sitter::Node, content: &str, values: &mut HashMap<String, String>) {
    let (Some(key), Some(value)) = (pair.named_child(0), pair.named_child(1)) else {
        return;
    };
    let raw = &content[value.byte_range()];
    let value = match value.kind() {
        "string" => raw.trim_matches(|c| c == '"' || c == '\'').to_string(),
        "boolean" => raw.to_string(),
        _ => return,
    };
    values.insert(key_path(&content[key.byte_range()]), value);
}

/// `pkg . "rust"` and `pkg.rust` both become `pkg.rust`
fn key_path(raw: &str) -> String {
    raw.split('.')
        .map(|segment| segment.trim().trim_matches('"'))
        .collect::<Vec<_>>()
        .join(".")
}

#[async_trait]
impl Checker for RustChecker {
    fn type_name(&self) -> &'static str {
        "rust"
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

        let channel = self.config.channel.as_str();
        let url = format!("{}/dist/channel-rust-{}.toml", self.base_url, channel);
        let fetched = ctx.fetcher().fetch(&FetchRequest::get(&url)).await?;
        let tables = parse_channel(fetched.text()?)?;

        let package = &self.config.package;
        let raw_version = tables
            .get(&format!("pkg.{}", package))
            .and_then(|values| values.get("version"))
            .ok_or_else(|| CheckError::InvalidResponse(format!("{} has no package {}", url, package)))?;
        let version = PACKAGE_VERSION
            .captures(raw_version)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                CheckError::InvalidResponse(format!("Unexpected {} version {:?}", package, raw_version))
            })?;

        let date = tables
            .get("")
            .and_then(|values| values.get("date"))
            .ok_or_else(|| CheckError::InvalidResponse(format!("{} has no date", url)))?;
        let released = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| CheckError::InvalidResponse(format!("Invalid date {:?}: {}", date, e)))?;
        let version = match self.config.channel {
            RustChannel::Nightly => format!("{}-{}", version, released.format("%Y%m%d")),
            RustChannel::Stable | RustChannel::Beta => version,
        };

        let target_table = format!("pkg.{}.target.{}", package, self.config.target);
        let target = tables.get(&target_table).ok_or_else(|| {
            CheckError::InvalidResponse(format!("{} is not built for {}", package, self.config.target))
        })?;
        if target.get("available").map(String::as_str) != Some("true") {
            debug!(
                "{}: {} {} is not available for {}",
                source.display_name(),
                package,
                version,
                self.config.target
            );
            return Ok(None);
        }
        let (Some(xz_url), Some(xz_hash)) = (target.get("xz_url"), target.get("xz_hash")) else {
            return Err(CheckError::InvalidResponse(format!("{} has no xz download", target_table)));
        };

        Ok(Some(
            VersionState::url(xz_url.clone())
                .with_version(version)
                .with_digests(Digests::sha256(xz_hash.clone()))
                .with_timestamp(released.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())),
        ))
    }
}
