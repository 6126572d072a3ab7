//! Versions scraped from a web page with regular expressions

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::check::checker::{CheckContext, Checker, Selection};
use crate::check::checkers::join_url;
use crate::check::config::{HtmlConfig, compile_pattern};
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::VersionState;
use crate::manifest::source::ManifestSource;
use crate::remote::fetch::FetchRequest;
use crate::version::{TemplateVars, expand};

enum Patterns {
    /// One regex, group 1 the URL and group 2 the version
    Combined(Regex),
    Separate {
        version: Regex,
        url: Option<Regex>,
    },
}

pub struct HtmlChecker {
    url: String,
    patterns: Patterns,
    url_template: Option<String>,
    sort_matches: bool,
}

impl HtmlChecker {
    pub fn new(config: &HtmlConfig) -> Result<Self, ConfigError> {
        let patterns = match (&config.pattern, &config.version_pattern) {
            (Some(pattern), _) => Patterns::Combined(compile_pattern(pattern, Some(2))?),
            (None, Some(version)) => Patterns::Separate {
                version: compile_pattern(version, Some(1))?,
                url: config
                    .url_pattern
                    .as_deref()
                    .map(|pattern| compile_pattern(pattern, Some(1)))
                    .transpose()?,
            },
            (None, None) => {
                return Err(ConfigError::Conflict(
                    "html checker needs \"pattern\" or \"version-pattern\"".into(),
                ));
            }
        };

        Ok(Self {
            url: config.url.clone(),
            patterns,
            url_template: config.url_template.clone(),
            sort_matches: config.sort_matches,
        })
    }

    fn selection(&self) -> Selection {
        if self.sort_matches {
            Selection::Greatest
        } else {
            Selection::First
        }
    }

    /// Returns `(version, url)` of the chosen release, URL possibly relative
    fn latest(&self, html: &str, ctx: &CheckContext) -> Result<Option<(String, String)>, CheckError> {
        match &self.patterns {
            Patterns::Combined(pattern) => {
                let candidates: Vec<(String, String)> = pattern
                    .captures_iter(html)
                    .filter_map(|c| Some((c.get(2)?.as_str().to_string(), c.get(1)?.as_str().to_string())))
                    .collect();
                if candidates.is_empty() {
                    return Err(no_match(pattern));
                }
                let Some(selected) = ctx.select(candidates, self.selection()) else {
                    return Ok(None);
                };
                let url = match &self.url_template {
                    Some(template) => expand(template, &TemplateVars::from_version(&selected.version))?,
                    None => selected.item,
                };
                Ok(Some((selected.version.to_string(), url)))
            }
            Patterns::Separate { version, url } => {
                let candidates: Vec<(String, ())> = version
                    .captures_iter(html)
                    .filter_map(|c| Some((c.get(1)?.as_str().to_string(), ())))
                    .collect();
                if candidates.is_empty() {
                    return Err(no_match(version));
                }
                let Some(selected) = ctx.select(candidates, self.selection()) else {
                    return Ok(None);
                };

                let latest = selected.version.as_str();
                let url = match (&self.url_template, url) {
                    (Some(template), _) => {
                        expand(template, &TemplateVars::from_version(&selected.version))?
                    }
                    (None, Some(url_pattern)) => {
                        let urls: Vec<&str> = url_pattern
                            .captures_iter(html)
                            .filter_map(|c| c.get(1).map(|m| m.as_str()))
                            .collect();
                        urls.iter()
                            .find(|url| url.contains(latest))
                            .or(urls.first())
                            .map(|url| url.to_string())
                            .ok_or_else(|| no_match(url_pattern))?
                    }
                    (None, None) => {
                        return Err(ConfigError::Conflict(
                            "\"version-pattern\" needs \"url-pattern\" or \"url-template\"".into(),
                        )
                        .into());
                    }
                };
                Ok(Some((latest.to_string(), url)))
            }
        }
    }
}

fn no_match(pattern: &Regex) -> CheckError {
    warn!("{} did not match", pattern.as_str());
    CheckError::InvalidResponse(format!("{} did not match the page", pattern.as_str()))
}

#[async_trait]
impl Checker for HtmlChecker {
    fn type_name(&self) -> &'static str {
        "html"
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

        let page = ctx.fetcher().fetch(&FetchRequest::get(&self.url)).await?;
        let Some((version, url)) = self.latest(page.text()?, ctx)? else {
            debug!("{}: no candidate passes the constraints", source.display_name());
            return Ok(None);
        };
        let url = join_url(&page.final_url, &url);
        debug!("{}: latest is {} at {}", source.display_name(), version, url);

        Ok(Some(VersionState::url(url).with_version(version)))
    }
}
