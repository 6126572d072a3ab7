//! Format-aware manifest tree
//!
//! Both JSON and YAML documents are lowered into the same [`Node`] tree. Every
//! node remembers the byte range it was parsed from, and scalars remember how
//! they were quoted, so a patch can rewrite a single value in place.

use std::ops::Range;

use serde_json::{Map, Number, Value};

pub type Span = Range<usize>;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Mapping {
        entries: Vec<Entry>,
        style: MappingStyle,
    },
    Sequence(Vec<Node>),
    Scalar {
        value: ScalarValue,
        style: ScalarStyle,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub key_span: Span,
    pub value: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStyle {
    /// `{ "key": value }`
    JsonObject,
    /// Indented `key: value` lines
    YamlBlock,
    /// `{key: value}` inside YAML
    YamlFlow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    /// Any JSON literal
    Json,
    Plain,
    SingleQuoted,
    DoubleQuoted,
    /// `|` or `>` block scalar
    Block,
}

impl Node {
    pub fn scalar(span: Span, value: ScalarValue, style: ScalarStyle) -> Self {
        Self {
            span,
            kind: NodeKind::Scalar { value, style },
        }
    }

    pub fn entries(&self) -> &[Entry] {
        match &self.kind {
            NodeKind::Mapping { entries, .. } => entries,
            _ => &[],
        }
    }

    pub fn items(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Sequence(items) => items,
            _ => &[],
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self.kind, NodeKind::Mapping { .. })
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, NodeKind::Sequence(_))
    }

    /// Last entry with the given key, matching JSON "last wins" semantics
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries().iter().rev().find(|e| e.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entry(key).map(|e| &e.value)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Scalar {
                value: ScalarValue::String(s),
                ..
            } => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::Scalar {
                value: ScalarValue::Bool(b),
                ..
            } => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.kind {
            NodeKind::Scalar {
                value: ScalarValue::Number(n),
                ..
            } => n.as_u64(),
            NodeKind::Scalar {
                value: ScalarValue::String(s),
                ..
            } => s.parse().ok(),
            _ => None,
        }
    }

    /// Resolves a `/`-separated path of keys and sequence indices
    pub fn pointer(&self, path: &str) -> Option<&Node> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| match &node.kind {
                NodeKind::Mapping { .. } => node.get(segment),
                NodeKind::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                NodeKind::Scalar { .. } => None,
            })
    }

    pub fn to_json(&self) -> Value {
        match &self.kind {
            NodeKind::Mapping { entries, .. } => {
                let mut map = Map::new();
                for entry in entries {
                    map.insert(entry.key.clone(), entry.value.to_json());
                }
                Value::Object(map)
            }
            NodeKind::Sequence(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            NodeKind::Scalar { value, .. } => match value {
                ScalarValue::Null => Value::Null,
                ScalarValue::Bool(b) => Value::Bool(*b),
                ScalarValue::Number(n) => Value::Number(n.clone()),
                ScalarValue::String(s) => Value::String(s.clone()),
            },
        }
    }
}
