//! Sources whose URL redirects to the latest release

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::check::checker::{CheckContext, Checker};
use crate::check::config::{RotatingUrlConfig, compile_pattern};
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;

pub struct RotatingUrlChecker {
    url: Option<String>,
    pattern: Option<Regex>,
    strip_query: bool,
}

impl RotatingUrlChecker {
    pub fn new(config: &RotatingUrlConfig) -> Result<Self, ConfigError> {
        let pattern = config
            .pattern
            .as_deref()
            .map(|pattern| compile_pattern(pattern, None))
            .transpose()?;

        Ok(Self {
            url: config.url.clone(),
            pattern,
            strip_query: config.strip_query,
        })
    }

    fn normalize(&self, url: &str) -> String {
        if self.strip_query {
            strip_query(url)
        } else {
            url.to_string()
        }
    }
}

fn strip_query(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}

#[async_trait]
impl Checker for RotatingUrlChecker {
    fn type_name(&self) -> &'static str {
        "rotating-url"
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

        let current_url = source.locator.url();
        let url = self.url.as_deref().unwrap_or(current_url);
        let resolved = ctx.fetcher().resolve(url).await?;
        let latest_url = self.normalize(&resolved);
        debug!("{} resolves to {}", url, latest_url);

        let version = match &self.pattern {
            Some(pattern) => {
                let captured = pattern
                    .captures(&latest_url)
                    .and_then(|captures| captures.get(1))
                    .map(|m| m.as_str().to_string());
                let Some(version) = captured else {
                    return Err(CheckError::InvalidResponse(format!(
                        "{} does not match {}",
                        latest_url,
                        pattern.as_str()
                    )));
                };
                Some(version)
            }
            None => None,
        };

        // Keep the declared spelling when only the stripped query differs
        let new_url = if self.normalize(current_url) == latest_url {
            current_url.to_string()
        } else {
            latest_url
        };

        let mut state = VersionState::url(new_url);
        state.version = version;
        Ok(Some(state))
    }
}
