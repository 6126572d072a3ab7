//! YAML manifests lowered into a [`Node`] tree
//!
//! tree-sitter-yaml layout for a typical manifest:
//! ```text
//! stream
//!   document
//!     block_node
//!       block_mapping
//!         block_mapping_pair      <- key: flow_node, value: block_node | flow_node
//!           flow_node
//!             plain_scalar
//!               string_scalar
//!           block_node
//!             block_sequence
//!               block_sequence_item
//!                 block_node | flow_node
//! ```
//!
//! Plain scalars are typed with the YAML 1.2 core schema.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Number;
use tracing::warn;

use crate::manifest::error::ManifestError;
use crate::manifest::json::named_children;
use crate::manifest::tree::{Entry, MappingStyle, Node, NodeKind, ScalarStyle, ScalarValue};

static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?[0-9]+$").expect("integer regex is valid"));
static FLOAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-+]?(\.[0-9]+|[0-9]+(\.[0-9]*)?)([eE][-+]?[0-9]+)?$")
        .expect("float regex is valid")
});

pub fn parse(text: &str) -> Result<Node, ManifestError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_yaml::LANGUAGE.into())
        .map_err(|e| {
            warn!("Failed to set YAML language for tree-sitter: {}", e);
            ManifestError::TreeSitter(e.to_string())
        })?;

    let tree = parser
        .parse(text, None)
        .ok_or_else(|| ManifestError::TreeSitter("Failed to parse YAML".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ManifestError::syntax_at(root));
    }

    let document = named_children(root)
        .into_iter()
        .find(|child| child.kind() == "document")
        .ok_or(ManifestError::Empty)?;
    let content = named_children(document)
        .into_iter()
        .find(|child| matches!(child.kind(), "block_node" | "flow_node"))
        .ok_or(ManifestError::Empty)?;
    convert(content, text)
}

/// Types a plain scalar the way a YAML 1.2 core-schema loader would
pub fn plain_scalar_value(raw: &str) -> ScalarValue {
    match raw {
        "" | "~" | "null" | "Null" | "NULL" => return ScalarValue::Null,
        "true" | "True" | "TRUE" => return ScalarValue::Bool(true),
        "false" | "False" | "FALSE" => return ScalarValue::Bool(false),
        _ => {}
    }

    if INTEGER_RE.is_match(raw) {
        if let Ok(n) = raw.parse::<i64>() {
            return ScalarValue::Number(n.into());
        }
        if let Ok(n) = raw.trim_start_matches('+').parse::<u64>() {
            return ScalarValue::Number(n.into());
        }
    }
    if FLOAT_RE.is_match(raw)
        && let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64)
    {
        return ScalarValue::Number(n);
    }

    ScalarValue::String(raw.to_string())
}

fn null_at(offset: usize) -> Node {
    Node::scalar(offset..offset, ScalarValue::Null, ScalarStyle::Plain)
}

fn unsupported(node: tree_sitter::Node, what: &str) -> ManifestError {
    ManifestError::Unsupported {
        what: what.to_string(),
        line: node.start_position().row + 1,
    }
}

fn convert(node: tree_sitter::Node, text: &str) -> Result<Node, ManifestError> {
    let span = node.byte_range();
    let raw = &text[span.clone()];

    match node.kind() {
        "block_node" | "flow_node" => {
            let inner = named_children(node)
                .into_iter()
                .find(|child| !matches!(child.kind(), "anchor" | "tag"));
            match inner {
                Some(inner) => convert(inner, text),
                None => Ok(null_at(span.end)),
            }
        }
        "block_mapping" | "flow_mapping" => {
            let style = if node.kind() == "block_mapping" {
                MappingStyle::YamlBlock
            } else {
                MappingStyle::YamlFlow
            };
            let entries = named_children(node)
                .into_iter()
                .map(|pair| convert_pair(pair, text))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node {
                span,
                kind: NodeKind::Mapping { entries, style },
            })
        }
        "block_sequence" | "flow_sequence" => {
            let items = named_children(node)
                .into_iter()
                .map(|item| match item.kind() {
                    "block_sequence_item" => match named_children(item).into_iter().next() {
                        Some(value) => convert(value, text),
                        None => Ok(null_at(item.end_byte())),
                    },
                    "flow_pair" => Ok(Node {
                        span: item.byte_range(),
                        kind: NodeKind::Mapping {
                            entries: vec![convert_pair(item, text)?],
                            style: MappingStyle::YamlFlow,
                        },
                    }),
                    _ => convert(item, text),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node {
                span,
                kind: NodeKind::Sequence(items),
            })
        }
        "plain_scalar" => Ok(Node::scalar(
            span,
            plain_scalar_value(raw.trim()),
            ScalarStyle::Plain,
        )),
        "double_quote_scalar" => Ok(Node::scalar(
            span,
            ScalarValue::String(decode_double_quoted(raw)),
            ScalarStyle::DoubleQuoted,
        )),
        "single_quote_scalar" => Ok(Node::scalar(
            span,
            ScalarValue::String(decode_single_quoted(raw)),
            ScalarStyle::SingleQuoted,
        )),
        "block_scalar" => Ok(Node::scalar(
            span,
            ScalarValue::String(decode_block(raw)),
            ScalarStyle::Block,
        )),
        "alias" => Err(unsupported(node, "YAML alias")),
        _ => Err(ManifestError::syntax_at(node)),
    }
}

fn convert_pair(pair: tree_sitter::Node, text: &str) -> Result<Entry, ManifestError> {
    // A bare `key` inside a flow mapping has no pair node
    let key_node = if matches!(pair.kind(), "block_mapping_pair" | "flow_pair") {
        pair.child_by_field_name("key")
            .ok_or_else(|| unsupported(pair, "mapping entry without key"))?
    } else {
        pair
    };
    let key = convert(key_node, text)?;
    let key_text = match &key.kind {
        NodeKind::Scalar {
            value: ScalarValue::String(s),
            ..
        } => s.clone(),
        NodeKind::Scalar { .. } => text[key.span.clone()].to_string(),
        _ => return Err(unsupported(key_node, "complex mapping key")),
    };

    let value = match pair.child_by_field_name("value") {
        Some(value) => convert(value, text)?,
        None => null_at(pair.end_byte()),
    };

    Ok(Entry {
        key: key_text,
        key_span: key.span,
        value,
    })
}

fn decode_single_quoted(raw: &str) -> String {
    let inner = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw);
    fold_lines(&inner.replace("''", "'"))
}

fn decode_double_quoted(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(' ') => out.push(' '),
                Some('/') => out.push('/'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(kind @ ('x' | 'u' | 'U')) => {
                    let width = match kind {
                        'x' => 2,
                        'u' => 4,
                        _ => 8,
                    };
                    let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                    match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => out.push(decoded),
                        None => {
                            out.push('\\');
                            out.push(kind);
                            out.push_str(&digits);
                        }
                    }
                }
                Some('\n') => {
                    while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
                }
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '\n' => {
                let trimmed = out.trim_end_matches([' ', '\t']).len();
                out.truncate(trimmed);
                fold_break(&mut out, &mut chars);
            }
            other => out.push(other),
        }
    }
    out
}

/// Applies flow-scalar line folding to already unescaped text
fn fold_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' {
            let trimmed = out.trim_end_matches([' ', '\t']).len();
            out.truncate(trimmed);
            fold_break(&mut out, &mut chars);
        } else {
            out.push(c);
        }
    }
    out
}

/// A single line break folds to a space, each further empty line to `\n`
fn fold_break(out: &mut String, chars: &mut std::iter::Peekable<std::str::Chars>) {
    let mut empty_lines = 0;
    loop {
        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
        if chars.next_if_eq(&'\n').is_some() {
            empty_lines += 1;
        } else {
            break;
        }
    }
    if empty_lines == 0 {
        out.push(' ');
    } else {
        out.extend(std::iter::repeat_n('\n', empty_lines));
    }
}

fn decode_block(raw: &str) -> String {
    let mut lines = raw.lines();
    let header = lines.next().unwrap_or_default().trim();
    let folded = header.starts_with('>');
    let chomping = if header.contains('-') {
        '-'
    } else if header.contains('+') {
        '+'
    } else {
        ' '
    };

    let body: Vec<&str> = lines.collect();
    let indent = body
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let body: Vec<&str> = body
        .iter()
        .map(|line| line.get(indent..).unwrap_or(""))
        .collect();

    let mut out = String::new();
    for (i, line) in body.iter().enumerate() {
        if i > 0 {
            let previous = body[i - 1];
            if !folded || line.is_empty() {
                out.push('\n');
            } else if previous.is_empty() {
                // break already emitted by the empty line
            } else if line.starts_with(' ') || previous.starts_with(' ') {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        out.push_str(line);
    }

    match chomping {
        '-' => out.trim_end_matches('\n').to_string(),
        '+' => out + "\n",
        _ => {
            let mut clipped = out.trim_end_matches('\n').to_string();
            clipped.push('\n');
            clipped
        }
    }
}
