//! Typed checker metadata parsed from `x-checker-data`
//!
//! Options shared by every checker type live in [`CommonOptions`]; the rest
//! of the object is deserialized into the struct of its `type`, rejecting
//! unknown fields.

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::check::error::ConfigError;
use crate::version::{ConstraintSet, Scheme};

const TYPE_KEY: &str = "type";

const COMMON_KEYS: &[&str] = &[
    "is-main-source",
    "is-important",
    "source-id",
    "parent-id",
    "versions",
    "version-scheme",
];

/// Options valid for every checker type
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CommonOptions {
    pub is_main_source: bool,
    pub is_important: Option<bool>,
    pub source_id: Option<String>,
    pub parent_id: Option<String>,
    pub versions: ConstraintSet,
    pub version_scheme: Scheme,
}

impl CommonOptions {
    /// `is-important`, defaulting to `is-main-source`
    pub fn is_important(&self) -> bool {
        self.is_important.unwrap_or(self.is_main_source)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RotatingUrlConfig {
    /// Defaults to the source URL
    pub url: Option<String>,
    pub pattern: Option<String>,
    pub strip_query: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HtmlConfig {
    pub url: String,
    #[serde(default)]
    pub version_pattern: Option<String>,
    #[serde(default)]
    pub url_pattern: Option<String>,
    /// Two groups: URL then version
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default = "default_true")]
    pub sort_matches: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GitConfig {
    #[serde(default)]
    pub tag_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub sort_tags: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            tag_pattern: None,
            sort_tags: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct JsonConfig {
    pub url: Option<String>,
    pub tag_query: Option<String>,
    pub tag_data_url: Option<String>,
    pub commit_query: Option<String>,
    pub commit_data_url: Option<String>,
    pub version_query: Option<String>,
    pub version_data_url: Option<String>,
    pub url_query: Option<String>,
    pub url_data_url: Option<String>,
    pub timestamp_query: Option<String>,
    pub timestamp_data_url: Option<String>,
    pub url_template: Option<String>,
}

impl JsonConfig {
    /// `(name, value query, data-url query)` in evaluation order
    pub fn queries(&self) -> Vec<(&'static str, &str, Option<&str>)> {
        [
            ("tag", &self.tag_query, &self.tag_data_url),
            ("commit", &self.commit_query, &self.commit_data_url),
            ("version", &self.version_query, &self.version_data_url),
            ("url", &self.url_query, &self.url_data_url),
            ("timestamp", &self.timestamp_query, &self.timestamp_data_url),
        ]
        .into_iter()
        .filter_map(|(name, query, data_url)| {
            query
                .as_deref()
                .map(|query| (name, query, data_url.as_deref()))
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DebianRepoConfig {
    pub package_name: String,
    pub root: String,
    pub dist: String,
    #[serde(default)]
    pub component: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AnityaConfig {
    pub project_id: u64,
    #[serde(default)]
    pub baseurl: Option<String>,
    #[serde(default)]
    pub stable_only: bool,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub tag_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GnomeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub stable_only: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PypiConfig {
    pub name: String,
    #[serde(default = "default_packagetype")]
    pub packagetype: String,
    #[serde(default)]
    pub stable_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ElectronConfig {
    /// Defaults to `latest-linux.yml` next to the source URL
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JetbrainsConfig {
    pub code: String,
    #[serde(default = "default_release_type")]
    pub release_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnapcraftConfig {
    pub name: String,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RustChannel {
    #[default]
    Stable,
    Beta,
    Nightly,
}

impl RustChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RustChannel::Stable => "stable",
            RustChannel::Beta => "beta",
            RustChannel::Nightly => "nightly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RustConfig {
    #[serde(default)]
    pub channel: RustChannel,
    pub package: String,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChromiumComponent {
    #[default]
    Chromium,
    LlvmGit,
    LlvmPrebuilt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ChromiumConfig {
    pub component: ChromiumComponent,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FirefoxConfig {}

fn default_true() -> bool {
    true
}

fn default_packagetype() -> String {
    "sdist".to_string()
}

fn default_release_type() -> String {
    "release".to_string()
}

/// Checker-specific options, one variant per `type`
#[derive(Debug, Clone, PartialEq)]
pub enum CheckerKind {
    RotatingUrl(RotatingUrlConfig),
    Html(HtmlConfig),
    Git(GitConfig),
    Json(JsonConfig),
    DebianRepo(DebianRepoConfig),
    Anitya(AnityaConfig),
    Gnome(GnomeConfig),
    Pypi(PypiConfig),
    ElectronUpdater(ElectronConfig),
    Jetbrains(JetbrainsConfig),
    Snapcraft(SnapcraftConfig),
    Rust(RustConfig),
    Chromium(ChromiumConfig),
    Firefox(FirefoxConfig),
}

impl CheckerKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            CheckerKind::RotatingUrl(_) => "rotating-url",
            CheckerKind::Html(_) => "html",
            CheckerKind::Git(_) => "git",
            CheckerKind::Json(_) => "json",
            CheckerKind::DebianRepo(_) => "debian-repo",
            CheckerKind::Anitya(_) => "anitya",
            CheckerKind::Gnome(_) => "gnome",
            CheckerKind::Pypi(_) => "pypi",
            CheckerKind::ElectronUpdater(_) => "electron-updater",
            CheckerKind::Jetbrains(_) => "jetbrains",
            CheckerKind::Snapcraft(_) => "snapcraft",
            CheckerKind::Rust(_) => "rust",
            CheckerKind::Chromium(_) => "chromium",
            CheckerKind::Firefox(_) => "firefox",
        }
    }

    fn parse(type_name: &str, fields: Value) -> Result<Self, ConfigError> {
        let kind = match type_name {
            "rotating-url" => CheckerKind::RotatingUrl(typed(type_name, fields)?),
            "html" => CheckerKind::Html(typed(type_name, fields)?),
            "git" => CheckerKind::Git(typed(type_name, fields)?),
            "json" => CheckerKind::Json(typed(type_name, fields)?),
            "debian-repo" => CheckerKind::DebianRepo(typed(type_name, fields)?),
            "anitya" => CheckerKind::Anitya(typed(type_name, fields)?),
            "gnome" => CheckerKind::Gnome(typed(type_name, fields)?),
            "pypi" => CheckerKind::Pypi(typed(type_name, fields)?),
            "electron-updater" => CheckerKind::ElectronUpdater(typed(type_name, fields)?),
            "jetbrains" => CheckerKind::Jetbrains(typed(type_name, fields)?),
            "snapcraft" => CheckerKind::Snapcraft(typed(type_name, fields)?),
            "rust" => CheckerKind::Rust(typed(type_name, fields)?),
            "chromium" => CheckerKind::Chromium(typed(type_name, fields)?),
            "firefox" => CheckerKind::Firefox(typed(type_name, fields)?),
            other => return Err(ConfigError::UnknownType(other.to_string())),
        };
        kind.validate()?;
        Ok(kind)
    }

    /// Compiles every pattern once so broken ones fail before any request
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CheckerKind::RotatingUrl(config) => {
                if let Some(pattern) = &config.pattern {
                    compile_pattern(pattern, None)?;
                }
            }
            CheckerKind::Html(config) => {
                match (&config.pattern, &config.version_pattern) {
                    (Some(pattern), None) => {
                        compile_pattern(pattern, Some(2))?;
                    }
                    (None, Some(version_pattern)) => {
                        compile_pattern(version_pattern, Some(1))?;
                    }
                    (Some(_), Some(_)) => {
                        return Err(ConfigError::Conflict(
                            "\"pattern\" and \"version-pattern\" are mutually exclusive".into(),
                        ));
                    }
                    (None, None) => {
                        return Err(ConfigError::Conflict(
                            "html checker needs \"pattern\" or \"version-pattern\"".into(),
                        ));
                    }
                }
                if let Some(url_pattern) = &config.url_pattern {
                    if config.url_template.is_some() {
                        return Err(ConfigError::Conflict(
                            "\"url-pattern\" and \"url-template\" are mutually exclusive".into(),
                        ));
                    }
                    compile_pattern(url_pattern, Some(1))?;
                }
                if config.version_pattern.is_some()
                    && config.url_pattern.is_none()
                    && config.url_template.is_none()
                {
                    return Err(ConfigError::Conflict(
                        "\"version-pattern\" needs \"url-pattern\" or \"url-template\"".into(),
                    ));
                }
            }
            CheckerKind::Git(config) => {
                if let Some(pattern) = &config.tag_pattern {
                    compile_pattern(pattern, Some(1))?;
                }
            }
            CheckerKind::Anitya(config) => {
                if config.url_template.is_none() && config.tag_template.is_none() {
                    return Err(ConfigError::Conflict(
                        "anitya checker needs \"url-template\" or \"tag-template\"".into(),
                    ));
                }
            }
            CheckerKind::DebianRepo(config) => {
                if config.component.is_none() && !config.dist.ends_with('/') {
                    return Err(ConfigError::Conflict(
                        "debian-repo checker needs \"component\" unless \"dist\" ends with /".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parsed `x-checker-data` of one source
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerConfig {
    pub common: CommonOptions,
    pub kind: CheckerKind,
}

impl CheckerConfig {
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(object) = value else {
            return Err(ConfigError::NotAnObject);
        };
        let type_name = object
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or(ConfigError::MissingType)?;

        let mut common = Map::new();
        let mut fields = Map::new();
        for (key, value) in object {
            if key == TYPE_KEY {
                continue;
            }
            if COMMON_KEYS.contains(&key.as_str()) {
                common.insert(key.clone(), value.clone());
            } else {
                fields.insert(key.clone(), value.clone());
            }
        }

        let common = typed::<CommonOptions>(type_name, Value::Object(common))?;
        let kind = CheckerKind::parse(type_name, Value::Object(fields))?;
        Ok(Self { common, kind })
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

fn typed<T: DeserializeOwned>(checker: &str, fields: Value) -> Result<T, ConfigError> {
    serde_json::from_value(fields).map_err(|source| ConfigError::Invalid {
        checker: checker.to_string(),
        source,
    })
}

/// Compiles `pattern`, requiring exactly `groups` capture groups when given
/// (or at least one when not).
pub fn compile_pattern(pattern: &str, groups: Option<usize>) -> Result<Regex, ConfigError> {
    let regex = Regex::new(pattern).map_err(|source| ConfigError::Regex {
        pattern: pattern.to_string(),
        source,
    })?;
    let found = regex.captures_len() - 1;
    let valid = match groups {
        Some(expected) => found == expected,
        None => found >= 1,
    };
    if !valid {
        return Err(ConfigError::CaptureGroups {
            pattern: pattern.to_string(),
            expected: groups.unwrap_or(1),
            found,
        });
    }
    Ok(regex)
}
