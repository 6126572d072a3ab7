//! In-place manifest rewriting
//!
//! Updates are collected as byte-range edits against the original text and
//! spliced in from the end of the document backwards, so everything outside
//! the edited values (comments, key order, indentation) is kept verbatim.

use tracing::{debug, info, warn};

use crate::check::state::{SourceState, Status, VersionState};
use crate::manifest::error::PatchError;
use crate::manifest::source::{Format, Locator, Manifest};
use crate::manifest::tree::{Entry, MappingStyle, Node, NodeKind, ScalarStyle, ScalarValue, Span};
use crate::manifest::yaml::plain_scalar_value;

const DIGEST_KEYS: [&str; 2] = ["sha256", "sha512"];

/// Result of applying accepted states to a manifest
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchOutcome {
    pub content: String,
    /// Sources whose fields were rewritten
    pub applied: Vec<String>,
    /// Sources left untouched because a required digest is unknown
    pub pending: Vec<String>,
    /// One `"<module>: Update <file> to <version>"` line per applied source
    pub changes: Vec<String>,
}

impl PatchOutcome {
    pub fn is_changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatchValue {
    Str(String),
    Int(u64),
}

impl PatchValue {
    fn matches(&self, node: &Node) -> bool {
        match (&node.kind, self) {
            (
                NodeKind::Scalar {
                    value: ScalarValue::String(current),
                    ..
                },
                PatchValue::Str(new),
            ) => current == new,
            (NodeKind::Scalar { value, .. }, PatchValue::Int(new)) => match value {
                ScalarValue::Number(current) => current.as_u64() == Some(*new),
                ScalarValue::String(current) => current.parse() == Ok(*new),
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    range: Span,
    text: String,
}

/// Selects the states whose updates should be written.
///
/// Only UPDATABLE states with a new version qualify. With
/// `require_important` set and at least one important source present, nothing
/// is selected unless an important source is itself UPDATABLE.
pub fn accepted_updates(states: &[SourceState], require_important: bool) -> Vec<&SourceState> {
    let updatable: Vec<&SourceState> = states
        .iter()
        .filter(|state| state.status == Status::Updatable && state.new.is_some())
        .collect();

    if require_important {
        let mut important = states.iter().filter(|state| state.important).peekable();
        if important.peek().is_some() && !important.any(|state| state.status == Status::Updatable)
        {
            info!("No important source was updated, leaving manifest unchanged");
            return Vec::new();
        }
    }
    updatable
}

/// Rewrites the locator, digest and size fields of every accepted state
pub fn apply(manifest: &Manifest, accepted: &[&SourceState]) -> Result<PatchOutcome, PatchError> {
    let mut patch = Patch {
        manifest,
        edits: Vec::new(),
    };
    let mut outcome = PatchOutcome::default();

    for state in accepted {
        let Some(new) = &state.new else {
            continue;
        };
        let node = manifest
            .root
            .pointer(&state.source_id)
            .ok_or_else(|| PatchError::UnknownSource(state.source_id.clone()))?;
        if !node.is_mapping() {
            return Err(PatchError::NotAMapping(state.source_id.clone()));
        }

        let Some(updates) = planned_updates(node, new) else {
            warn!("{}: digest of new version is unknown, not updating", state.name());
            outcome.pending.push(state.source_id.clone());
            continue;
        };

        let before = patch.edits.len();
        for (key, value) in updates {
            patch.set(node, key, value);
        }
        if patch.edits.len() > before {
            debug!("{}: {} field(s) to update", state.name(), patch.edits.len() - before);
            outcome.applied.push(state.source_id.clone());
            outcome.changes.push(change_message(state, new));
        }
    }

    outcome.content = patch.render()?;
    Ok(outcome)
}

fn change_message(state: &SourceState, new: &VersionState) -> String {
    match &new.version {
        Some(version) => format!("{}: Update {} to {}", state.module, state.filename, version),
        None => format!("{}: Update {}", state.module, state.filename),
    }
}

/// Fields to write for `new`, or None when a needed digest is missing
fn planned_updates(node: &Node, new: &VersionState) -> Option<Vec<(&'static str, PatchValue)>> {
    let mut updates = Vec::new();
    match &new.locator {
        Locator::Url { url } => {
            updates.push(("url", PatchValue::Str(url.clone())));

            let declared: Vec<&'static str> = DIGEST_KEYS
                .into_iter()
                .filter(|key| node.get(key).is_some())
                .collect();
            let wanted = if declared.is_empty() {
                vec!["sha256"]
            } else {
                declared
            };
            for key in wanted {
                let digest = match key {
                    "sha256" => new.digests.sha256.clone(),
                    _ => new.digests.sha512.clone(),
                };
                updates.push((key, PatchValue::Str(digest?)));
            }

            if node.get("size").is_some() {
                updates.push(("size", PatchValue::Int(new.size?)));
            }
        }
        Locator::Git {
            url, tag, commit, ..
        } => {
            if node.get("url").and_then(Node::as_str) != Some(url.as_str()) {
                updates.push(("url", PatchValue::Str(url.clone())));
            }
            if let Some(tag) = tag {
                updates.push(("tag", PatchValue::Str(tag.clone())));
            }
            match commit {
                Some(commit) => updates.push(("commit", PatchValue::Str(commit.clone()))),
                None if tag.is_some() && node.get("commit").is_some() => return None,
                None if tag.is_none() => return None,
                None => {}
            }
        }
    }
    Some(updates)
}

struct Patch<'m> {
    manifest: &'m Manifest,
    edits: Vec<Edit>,
}

impl Patch<'_> {
    fn text(&self) -> &str {
        &self.manifest.text
    }

    fn set(&mut self, mapping: &Node, key: &str, value: PatchValue) {
        match mapping.entry(key) {
            Some(entry) if value.matches(&entry.value) => {}
            Some(entry) => self.replace(&entry.value, &value),
            None => self.insert(mapping, key, &value),
        }
    }

    fn replace(&mut self, node: &Node, value: &PatchValue) {
        let style = match &node.kind {
            NodeKind::Scalar { style, .. } => *style,
            _ => self.default_style(),
        };
        let mut text = render(style, value);
        if node.span.is_empty() {
            text.insert(0, ' ');
        }
        self.edits.push(Edit {
            range: node.span.clone(),
            text,
        });
    }

    fn default_style(&self) -> ScalarStyle {
        match self.manifest.format {
            Format::Json => ScalarStyle::Json,
            Format::Yaml => ScalarStyle::Plain,
        }
    }

    fn insert(&mut self, mapping: &Node, key: &str, value: &PatchValue) {
        let NodeKind::Mapping { entries, style } = &mapping.kind else {
            return;
        };
        let Some(last) = entries.last() else {
            // Sources always have at least `type` and `url`
            return;
        };
        let rendered = render(self.default_style(), value);

        let (position, text) = match style {
            MappingStyle::JsonObject => {
                let key = render(ScalarStyle::Json, &PatchValue::Str(key.to_string()));
                let inline = !self.text()[mapping.span.start..last.key_span.start].contains('\n');
                let text = if inline {
                    format!(", {}: {}", key, rendered)
                } else {
                    format!(",\n{}{}: {}", self.indent_of(last), key, rendered)
                };
                (last.value.span.end, text)
            }
            MappingStyle::YamlBlock => {
                let end = last.value.span.end.max(last.key_span.end);
                let line_end = self.text()[end..]
                    .find('\n')
                    .map_or(self.text().len(), |offset| end + offset);
                (line_end, format!("\n{}{}: {}", self.indent_of(last), key, rendered))
            }
            MappingStyle::YamlFlow => (last.value.span.end, format!(", {}: {}", key, rendered)),
        };

        // Consecutive inserts at one point keep their order
        if let Some(existing) = self
            .edits
            .iter_mut()
            .find(|edit| edit.range.is_empty() && edit.range.start == position)
        {
            existing.text.push_str(&text);
        } else {
            self.edits.push(Edit {
                range: position..position,
                text,
            });
        }
    }

    /// Whitespace matching the column of `entry`'s key
    fn indent_of(&self, entry: &Entry) -> String {
        let text = self.text();
        let start = entry.key_span.start;
        let line_start = text[..start].rfind('\n').map_or(0, |p| p + 1);
        let prefix = &text[line_start..start];
        if prefix.chars().all(char::is_whitespace) {
            prefix.to_string()
        } else {
            " ".repeat(prefix.chars().count())
        }
    }

    fn render(mut self) -> Result<String, PatchError> {
        self.edits.sort_by_key(|edit| (edit.range.start, edit.range.end));
        for pair in self.edits.windows(2) {
            if pair[0].range.end > pair[1].range.start {
                return Err(PatchError::Overlap(pair[1].range.start, pair[0].range.end));
            }
        }

        let mut content = self.manifest.text.clone();
        for edit in self.edits.iter().rev() {
            content.replace_range(edit.range.clone(), &edit.text);
        }
        Ok(content)
    }
}

fn render(style: ScalarStyle, value: &PatchValue) -> String {
    let quoted = |s: &str| serde_json::Value::String(s.to_string()).to_string();
    match (style, value) {
        (ScalarStyle::Json | ScalarStyle::Plain, PatchValue::Int(n)) => n.to_string(),
        (ScalarStyle::Json | ScalarStyle::DoubleQuoted | ScalarStyle::Block, PatchValue::Str(s)) => {
            quoted(s)
        }
        (ScalarStyle::DoubleQuoted | ScalarStyle::Block, PatchValue::Int(n)) => {
            quoted(&n.to_string())
        }
        (ScalarStyle::SingleQuoted, PatchValue::Str(s)) => format!("'{}'", s.replace('\'', "''")),
        (ScalarStyle::SingleQuoted, PatchValue::Int(n)) => format!("'{}'", n),
        (ScalarStyle::Plain, PatchValue::Str(s)) => {
            if is_plain_safe(s) {
                s.clone()
            } else {
                quoted(s)
            }
        }
    }
}

/// True when `s` reads back as the same string without quotes
fn is_plain_safe(s: &str) -> bool {
    const INDICATORS: [char; 19] = [
        '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%', '@',
        '`',
    ];
    !s.is_empty()
        && s.trim() == s
        && !s.starts_with(INDICATORS)
        && !s.contains(": ")
        && !s.contains(" #")
        && !s.ends_with(':')
        && !s.chars().any(char::is_control)
        && matches!(plain_scalar_value(s), ScalarValue::String(_))
}
