//! `$name` / `${name}` substitution for URL, tag and query templates
//!
//! The grammar is deliberately small:
//! - `$name` where name is `[A-Za-z_][A-Za-z0-9_]*` (longest match)
//! - `${name}` to delimit a name from following identifier characters
//! - `$$` for a literal dollar sign
//!
//! Every other use of `$` is an error, as is a name with no value.

use indexmap::IndexMap;

use crate::version::error::TemplateError;
use crate::version::value::VersionValue;

/// Named values available to a template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    vars: IndexMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables derived from a version: `version`, `version0`..`versionN`
    /// (split on `.` and `-`), and `major`/`minor`/`patch`.
    ///
    /// Under the semantic scheme `major`, `minor` and `patch` are the semver
    /// fields; otherwise they are the first three positional components.
    pub fn from_version(version: &VersionValue) -> Self {
        let raw = version.as_str();
        let mut vars = Self::new().with("version", raw);

        let parts: Vec<&str> = raw.split(['.', '-']).filter(|p| !p.is_empty()).collect();
        for (i, part) in parts.iter().enumerate() {
            vars.insert(format!("version{i}"), *part);
        }

        if let Some(semver) = version.semver() {
            vars.insert("major", semver.major.to_string());
            vars.insert("minor", semver.minor.to_string());
            vars.insert("patch", semver.patch.to_string());
        } else {
            for (name, part) in ["major", "minor", "patch"].into_iter().zip(&parts) {
                vars.insert(name, *part);
            }
        }
        vars
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expands all placeholders in `template`
pub fn expand(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let dollar_at = offset + pos;
        let after = &rest[pos + 1..];
        let invalid = || TemplateError::InvalidPlaceholder {
            template: template.to_string(),
            offset: dollar_at,
        };

        let (name, consumed) = if after.starts_with('$') {
            out.push('$');
            rest = &after[1..];
            offset = dollar_at + 2;
            continue;
        } else if let Some(braced) = after.strip_prefix('{') {
            let close = braced.find('}').ok_or_else(invalid)?;
            let name = &braced[..close];
            let mut chars = name.chars();
            let valid = chars.next().is_some_and(is_ident_start) && chars.all(is_ident_continue);
            if !valid {
                return Err(invalid());
            }
            (name, close + 2)
        } else if after.starts_with(is_ident_start) {
            let end = after
                .find(|c: char| !is_ident_continue(c))
                .unwrap_or(after.len());
            (&after[..end], end)
        } else {
            return Err(invalid());
        };

        let value = vars
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(value);

        rest = &after[consumed..];
        offset = dollar_at + 1 + consumed;
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::value::Scheme;
    use rstest::rstest;

    fn vars(version: &str) -> TemplateVars {
        TemplateVars::new().with("version", version)
    }

    #[rstest]
    #[case("$version", "1.2.3", "1.2.3")]
    #[case("${version}_x", "1", "1_x")]
    #[case("https://e.com/v$version.tar.gz", "2.0", "https://e.com/v2.0.tar.gz")]
    #[case("cost: $$5 for $version", "1", "cost: $5 for 1")]
    #[case("no placeholders", "1", "no placeholders")]
    #[case("", "1", "")]
    fn expand_substitutes_known_names(
        #[case] template: &str,
        #[case] version: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(expand(template, &vars(version)).unwrap(), expected);
    }

    #[rstest]
    #[case("$release", "release")]
    #[case("$version_x", "version_x")]
    #[case("${nope}", "nope")]
    fn expand_fails_on_unknown_name(#[case] template: &str, #[case] name: &str) {
        assert_eq!(
            expand(template, &vars("1")),
            Err(TemplateError::UnknownPlaceholder(name.to_string()))
        );
    }

    #[rstest]
    #[case("price $", 6)]
    #[case("a $1", 2)]
    #[case("${version", 0)]
    #[case("${}", 0)]
    #[case("${1x}", 0)]
    fn expand_fails_on_malformed_placeholder(#[case] template: &str, #[case] offset: usize) {
        assert_eq!(
            expand(template, &vars("1")),
            Err(TemplateError::InvalidPlaceholder {
                template: template.to_string(),
                offset
            })
        );
    }

    #[test]
    fn from_version_exposes_positional_components() {
        let version = VersionValue::parse("3.38.1-2", Scheme::Loose).unwrap();
        let vars = TemplateVars::from_version(&version);

        assert_eq!(
            expand("$major.$minor/$version0-$version1-$version2-$version3", &vars).unwrap(),
            "3.38/3-38-1-2"
        );
        assert_eq!(vars.get("patch"), Some("1"));
    }

    #[test]
    fn from_version_uses_semver_fields_under_semantic_scheme() {
        let version = VersionValue::parse("v2.5", Scheme::Semantic).unwrap();
        let vars = TemplateVars::from_version(&version);

        assert_eq!(
            expand("$major.$minor.$patch ($version)", &vars).unwrap(),
            "2.5.0 (v2.5)"
        );
        assert_eq!(vars.get("version0"), Some("v2"));
    }

    #[test]
    fn from_version_omits_missing_components() {
        let version = VersionValue::parse("7", Scheme::Loose).unwrap();
        let vars = TemplateVars::from_version(&version);

        assert_eq!(vars.get("major"), Some("7"));
        assert_eq!(
            expand("$minor", &vars),
            Err(TemplateError::UnknownPlaceholder("minor".to_string()))
        );
    }
}
