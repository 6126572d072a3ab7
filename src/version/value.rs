//! Comparable version values under a loose or semantic ordering scheme

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use serde::Deserialize;

use crate::version::error::VersionError;

/// Version ordering convention declared by `version-scheme`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Component-wise comparison of numeric and alphabetic runs
    #[default]
    Loose,
    /// major.minor.patch with pre-release precedence
    Semantic,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Loose => "loose",
            Scheme::Semantic => "semantic",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static LOOSE_COMPONENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+|[A-Za-z]+").expect("loose component regex is valid"));

/// One run of digits or letters inside a loose version
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    /// Digits with leading zeros stripped, compared by length then lexically
    Number(String),
    Word(String),
}

impl Component {
    fn number(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            Component::Number("0".to_string())
        } else {
            Component::Number(trimmed.to_string())
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Number(a), Component::Number(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Component::Word(a), Component::Word(b)) => a.cmp(b),
            // Numbers sort before words, so "13.0-beta3" > "13.0.1"
            (Component::Number(_), Component::Word(_)) => Ordering::Less,
            (Component::Word(_), Component::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct LooseVersion {
    components: Vec<Component>,
}

impl LooseVersion {
    fn parse(raw: &str) -> Option<Self> {
        let components: Vec<Component> = LOOSE_COMPONENT_RE
            .find_iter(raw)
            .map(|m| {
                let text = m.as_str();
                if text.as_bytes()[0].is_ascii_digit() {
                    Component::number(text)
                } else {
                    Component::Word(text.to_string())
                }
            })
            .collect();

        if components
            .iter()
            .any(|c| matches!(c, Component::Number(_)))
        {
            Some(Self { components })
        } else {
            None
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        let zero = Component::Number("0".to_string());
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let left = self.components.get(i).unwrap_or(&zero);
            let right = other.components.get(i).unwrap_or(&zero);
            match left.cmp(right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

/// Parse a version string into a semver::Version, normalizing partial versions.
///
/// A leading `v` is dropped and a missing minor or patch is padded with zeros,
/// keeping any pre-release or build suffix:
/// - "1" -> 1.0.0
/// - "v1.2" -> 1.2.0
/// - "1.2-rc.1" -> 1.2.0-rc.1
pub fn parse_semver(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split_at = stripped.find(['-', '+']).unwrap_or(stripped.len());
    let (core, suffix) = stripped.split_at(split_at);
    let normalized = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => stripped.to_string(),
    };
    Version::parse(&normalized).ok()
}

#[derive(Debug, Clone)]
enum Repr {
    Loose(LooseVersion),
    Semantic(Version),
}

/// A version string parsed under a [`Scheme`]
///
/// Values are only comparable with values parsed under the same scheme.
#[derive(Debug, Clone)]
pub struct VersionValue {
    raw: String,
    repr: Repr,
}

impl VersionValue {
    pub fn parse(raw: &str, scheme: Scheme) -> Result<Self, VersionError> {
        let repr = match scheme {
            Scheme::Loose => LooseVersion::parse(raw).map(Repr::Loose),
            Scheme::Semantic => parse_semver(raw).map(Repr::Semantic),
        };

        repr.map(|repr| Self {
            raw: raw.to_string(),
            repr,
        })
        .ok_or_else(|| VersionError::Parse {
            raw: raw.to_string(),
            scheme,
        })
    }

    pub fn scheme(&self) -> Scheme {
        match self.repr {
            Repr::Loose(_) => Scheme::Loose,
            Repr::Semantic(_) => Scheme::Semantic,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed semantic version, when this value uses the semantic scheme
    pub fn semver(&self) -> Option<&Version> {
        match &self.repr {
            Repr::Semantic(v) => Some(v),
            Repr::Loose(_) => None,
        }
    }

    pub fn compare(&self, other: &Self) -> Result<Ordering, VersionError> {
        match (&self.repr, &other.repr) {
            (Repr::Loose(a), Repr::Loose(b)) => Ok(a.compare(b)),
            (Repr::Semantic(a), Repr::Semantic(b)) => Ok(a.cmp_precedence(b)),
            _ => Err(VersionError::IncomparableScheme {
                left: self.scheme(),
                right: other.scheme(),
            }),
        }
    }
}

impl fmt::Display for VersionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
