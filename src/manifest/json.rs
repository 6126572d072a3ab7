//! JSON manifests (comments tolerated) lowered into a [`Node`] tree
//!
//! tree-sitter-json layout:
//! ```text
//! document
//!   object
//!     pair              <- key: string, value: _value
//!       string
//!       array | object | string | number | true | false | null
//!     comment           <- extra, skipped
//! ```

use serde_json::Number;
use tracing::warn;

use crate::manifest::error::ManifestError;
use crate::manifest::tree::{Entry, MappingStyle, Node, NodeKind, ScalarStyle, ScalarValue};

pub fn parse(text: &str) -> Result<Node, ManifestError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_json::LANGUAGE.into())
        .map_err(|e| {
            warn!("Failed to set JSON language for tree-sitter: {}", e);
            ManifestError::TreeSitter(e.to_string())
        })?;

    let tree = parser
        .parse(text, None)
        .ok_or_else(|| ManifestError::TreeSitter("Failed to parse JSON".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(ManifestError::syntax_at(root));
    }

    let value = named_children(root)
        .into_iter()
        .next()
        .ok_or(ManifestError::Empty)?;
    convert(value, text)
}

/// Named children that are not comments
pub(crate) fn named_children(node: tree_sitter::Node) -> Vec<tree_sitter::Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| !child.is_extra())
        .collect()
}

fn convert(node: tree_sitter::Node, text: &str) -> Result<Node, ManifestError> {
    let span = node.byte_range();
    let raw = &text[span.clone()];

    let scalar = |value: ScalarValue| -> Result<Node, ManifestError> {
        Ok(Node::scalar(span.clone(), value, ScalarStyle::Json))
    };

    match node.kind() {
        "object" => {
            let mut entries = Vec::new();
            for pair in named_children(node) {
                let (Some(key), Some(value)) = (
                    pair.child_by_field_name("key"),
                    pair.child_by_field_name("value"),
                ) else {
                    return Err(ManifestError::syntax_at(pair));
                };
                entries.push(Entry {
                    key: decode_string(key, text)?,
                    key_span: key.byte_range(),
                    value: convert(value, text)?,
                });
            }
            Ok(Node {
                span,
                kind: NodeKind::Mapping {
                    entries,
                    style: MappingStyle::JsonObject,
                },
            })
        }
        "array" => {
            let items = named_children(node)
                .into_iter()
                .map(|item| convert(item, text))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node {
                span,
                kind: NodeKind::Sequence(items),
            })
        }
        "string" => scalar(ScalarValue::String(decode_string(node, text)?)),
        "number" => {
            let number: Number =
                serde_json::from_str(raw).map_err(|_| ManifestError::syntax_at(node))?;
            scalar(ScalarValue::Number(number))
        }
        "true" => scalar(ScalarValue::Bool(true)),
        "false" => scalar(ScalarValue::Bool(false)),
        "null" => scalar(ScalarValue::Null),
        _ => Err(ManifestError::syntax_at(node)),
    }
}

fn decode_string(node: tree_sitter::Node, text: &str) -> Result<String, ManifestError> {
    serde_json::from_str(&text[node.byte_range()]).map_err(|_| ManifestError::syntax_at(node))
}
