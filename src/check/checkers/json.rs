//! Versions extracted from JSON documents with jq queries
//!
//! Queries run in the order tag, commit, version, url, timestamp. Each result
//! is bound as a string variable (`$tag`, `$version`, ...) for the queries
//! after it, and `$parent` holds the `{current, new}` state of the parent
//! source when one is declared.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::check::checker::{CheckContext, Checker};
use crate::check::config::JsonConfig;
use crate::check::error::{CheckError, ConfigError};
use crate::check::state::{SourceState, VersionState};
use crate::manifest::source::{Locator, ManifestSource};
use crate::remote::fetch::FetchRequest;
use crate::remote::git;
use crate::remote::query::scalar_to_string;
use crate::version::{Scheme, TemplateVars, VersionValue, expand};

pub struct JsonChecker {
    config: JsonConfig,
}

impl JsonChecker {
    pub fn new(config: JsonConfig) -> Self {
        Self { config }
    }

    async fn run_queries(
        &self,
        ctx: &CheckContext,
        initial: &Value,
        mut vars: Map<String, Value>,
        include_url: bool,
    ) -> Result<IndexMap<&'static str, String>, CheckError> {
        let mut results = IndexMap::new();
        for (name, query, data_url) in self.config.queries() {
            if name == "url" && !include_url {
                continue;
            }
            let data = match data_url {
                Some(url_query) => {
                    let url = ctx.query().run(url_query, initial, &vars).await?;
                    fetch_json(ctx, &scalar_to_string(url_query, &url)?).await?
                }
                None => initial.clone(),
            };
            let value = ctx.query().run(query, &data, &vars).await?;
            let value = scalar_to_string(query, &value)?;
            debug!("{} = {:?}", name, value);
            vars.insert(name.to_string(), Value::String(value.clone()));
            results.insert(name, value);
        }
        Ok(results)
    }
}

async fn fetch_json(ctx: &CheckContext, url: &str) -> Result<Value, CheckError> {
    let fetched = ctx.fetcher().fetch(&FetchRequest::get(url)).await?;
    Ok(fetched.json()?)
}

/// Parses an ISO 8601 timestamp; values without an offset are taken as UTC
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CheckError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CheckError::InvalidResponse(format!("Invalid timestamp {:?}", raw)))
}

/// Template variables for a version that may not parse under `scheme`
pub(crate) fn version_vars(version: &str, scheme: Scheme) -> TemplateVars {
    VersionValue::parse(version, scheme)
        .map(|value| TemplateVars::from_version(&value))
        .unwrap_or_else(|_| TemplateVars::new().with("version", version))
}

fn timestamp(results: &IndexMap<&'static str, String>) -> Result<Option<DateTime<Utc>>, CheckError> {
    results
        .get("timestamp")
        .map(|raw| parse_timestamp(raw))
        .transpose()
}

fn parent_var(parent: Option<&SourceState>) -> Value {
    parent.map_or(Value::Null, SourceState::parent_json)
}

#[async_trait]
impl Checker for JsonChecker {
    fn type_name(&self) -> &'static str {
        "json"
    }

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError> {
        let initial = match &self.config.url {
            Some(url) => fetch_json(ctx, url).await?,
            None => Value::Null,
        };

        let mut vars = Map::new();
        if ctx.parent_id.is_some() || ctx.parent.is_some() {
            vars.insert("parent".to_string(), parent_var(ctx.parent.as_deref()));
        }

        if let Locator::Git { url, .. } = &source.locator {
            if self.config.tag_query.is_none() && self.config.commit_query.is_none() {
                return Err(ConfigError::Conflict(
                    "json checker needs \"tag-query\" or \"commit-query\" for git sources".into(),
                )
                .into());
            }
            let results = self.run_queries(ctx, &initial, vars, false).await?;
            let tag = results.get("tag").cloned();
            let mut commit = results.get("commit").cloned();
            if commit.is_none()
                && let Some(tag) = &tag
            {
                let refs = ctx.git().list_refs(url).await?;
                let resolved = git::tag_commit(&refs, tag)
                    .ok_or_else(|| CheckError::InvalidResponse(format!("Tag {} not found in {}", tag, url)))?;
                commit = Some(resolved.to_string());
            }

            let mut state = VersionState::git(url.clone(), tag, commit, None)
                .with_timestamp(timestamp(&results)?);
            state.version = results.get("version").cloned();
            return Ok(Some(state));
        }

        if self.config.version_query.is_none() {
            return Err(ConfigError::Conflict("json checker needs \"version-query\"".into()).into());
        }
        if self.config.url_query.is_none() && self.config.url_template.is_none() {
            return Err(ConfigError::Conflict(
                "json checker needs \"url-query\" or \"url-template\"".into(),
            )
            .into());
        }

        let results = self.run_queries(ctx, &initial, vars, true).await?;
        let Some(version) = results.get("version") else {
            return Ok(None);
        };
        let url = match (&self.config.url_template, results.get("url")) {
            (Some(template), _) => {
                let mut template_vars = version_vars(version, ctx.scheme);
                for (name, value) in &results {
                    if *name != "version" {
                        template_vars.insert(*name, value.clone());
                    }
                }
                expand(template, &template_vars)?
            }
            (None, Some(url)) => url.clone(),
            (None, None) => return Ok(None),
        };

        Ok(Some(
            VersionState::url(url)
                .with_version(version.clone())
                .with_timestamp(timestamp(&results)?),
        ))
    }
}
