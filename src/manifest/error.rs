use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Manifest {path} is {size} bytes, exceeding the limit of {limit} bytes")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Unsupported manifest format: {0}")]
    UnknownFormat(PathBuf),

    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("Syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    #[error("Unsupported construct at line {line}: {what}")]
    Unsupported { what: String, line: usize },

    #[error("Manifest is empty")]
    Empty,

    #[error("Can't determine manifest kind")]
    UnknownKind,
}

impl ManifestError {
    /// Points at the first error or missing node below `node`
    pub(crate) fn syntax_at(node: tree_sitter::Node) -> Self {
        let culprit = first_error(node).unwrap_or(node);
        let position = culprit.start_position();
        ManifestError::Syntax {
            line: position.row + 1,
            column: position.column + 1,
        }
    }
}

fn first_error(node: tree_sitter::Node) -> Option<tree_sitter::Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error())
        .find_map(first_error)
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Source {0} is not present in the manifest")]
    UnknownSource(String),

    #[error("Source {0} is not a mapping")]
    NotAMapping(String),

    #[error("Overlapping edits at bytes {0}..{1}")]
    Overlap(usize, usize),
}
