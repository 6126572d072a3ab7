//! Manifest loading and source extraction

use std::fmt;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::manifest::error::ManifestError;
use crate::manifest::tree::Node;
use crate::manifest::{json, yaml};
use crate::remote::digest::Digests;

/// Key holding checker metadata inside a source
pub const CHECKER_DATA_KEY: &str = "x-checker-data";

/// Architecture assumed for sources without `only-arches`
pub const DEFAULT_ARCH: &str = "x86_64";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("yml" | "yaml") => Ok(Format::Yaml),
            _ => Err(ManifestError::UnknownFormat(path.to_path_buf())),
        }
    }
}

/// Top-level shape of a manifest file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Has `id` or `app-id`, sources live under `modules`
    App,
    /// Has `name` and `sources` or `modules`
    Module,
    /// A bare list of sources
    Sources,
    /// A single source object
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Archive,
    File,
    ExtraData,
    Git,
}

impl SourceKind {
    pub fn from_type(source_type: &str) -> Option<Self> {
        match source_type {
            "archive" => Some(SourceKind::Archive),
            "file" => Some(SourceKind::File),
            "extra-data" => Some(SourceKind::ExtraData),
            "git" => Some(SourceKind::Git),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Archive => "archive",
            SourceKind::File => "file",
            SourceKind::ExtraData => "extra-data",
            SourceKind::Git => "git",
        }
    }
}

/// Where a source's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Locator {
    Url {
        url: String,
    },
    Git {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
    },
}

impl Locator {
    pub fn url(&self) -> &str {
        match self {
            Locator::Url { url } | Locator::Git { url, .. } => url,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Url { url } => f.write_str(url),
            Locator::Git {
                url,
                branch,
                tag,
                commit,
            } => {
                write!(f, "{}", url)?;
                if let Some(tag) = tag {
                    write!(f, " tag {}", tag)?;
                }
                if let Some(branch) = branch {
                    write!(f, " branch {}", branch)?;
                }
                if let Some(commit) = commit {
                    write!(f, " commit {}", commit)?;
                }
                Ok(())
            }
        }
    }
}

/// One external-data reference found in a manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSource {
    /// Path of the source node, e.g. `/modules/1/sources/0`
    pub id: String,
    pub module: String,
    pub kind: SourceKind,
    pub filename: String,
    pub locator: Locator,
    pub digests: Digests,
    pub size: Option<u64>,
    pub arches: Vec<String>,
    pub checker_data: Option<Value>,
}

impl ManifestSource {
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.module, self.filename)
    }

    pub fn arch(&self) -> &str {
        self.arches.first().map_or(DEFAULT_ARCH, String::as_str)
    }

    pub fn is_git(&self) -> bool {
        self.kind == SourceKind::Git
    }
}

/// A parsed manifest together with its original text
#[derive(Debug, Clone)]
pub struct Manifest {
    pub format: Format,
    pub kind: ManifestKind,
    /// Module name used for sources outside any module
    pub name: String,
    pub text: String,
    pub root: Node,
}

impl Manifest {
    pub fn parse(format: Format, name: &str, text: String) -> Result<Self, ManifestError> {
        let root = match format {
            Format::Json => json::parse(&text)?,
            Format::Yaml => yaml::parse(&text)?,
        };
        let kind = detect_kind(&root)?;

        Ok(Self {
            format,
            kind,
            name: name.to_string(),
            text,
            root,
        })
    }

    pub fn load(path: &Path, max_size: u64) -> Result<Self, ManifestError> {
        let io_error = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = std::fs::metadata(path).map_err(io_error)?.len();
        if size > max_size {
            return Err(ManifestError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: max_size,
            });
        }

        let format = Format::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(io_error)?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("manifest");
        Self::parse(format, name, text)
    }

    /// Sources of a supported kind, in document order
    pub fn sources(&self) -> Vec<ManifestSource> {
        let mut sources = Vec::new();
        match self.kind {
            ManifestKind::App => {
                if let Some(modules) = self.root.get("modules") {
                    for (i, module) in modules.items().iter().enumerate() {
                        collect_module(&format!("/modules/{i}"), module, &mut sources);
                    }
                }
            }
            ManifestKind::Module => collect_module("", &self.root, &mut sources),
            ManifestKind::Sources => {
                for (i, source) in self.root.items().iter().enumerate() {
                    collect_source(&format!("/{i}"), source, &self.name, &mut sources);
                }
            }
            ManifestKind::Source => collect_source("", &self.root, &self.name, &mut sources),
        }
        sources
    }
}

fn detect_kind(root: &Node) -> Result<ManifestKind, ManifestError> {
    if root.is_sequence() {
        return Ok(ManifestKind::Sources);
    }
    if !root.is_mapping() {
        return Err(ManifestError::UnknownKind);
    }
    if root.get("id").is_some() || root.get("app-id").is_some() {
        return Ok(ManifestKind::App);
    }
    if root.get("name").is_some() && (root.get("sources").is_some() || root.get("modules").is_some())
    {
        return Ok(ManifestKind::Module);
    }
    if root.get("type").is_some() {
        return Ok(ManifestKind::Source);
    }
    Err(ManifestError::UnknownKind)
}

fn collect_module(path: &str, module: &Node, sources: &mut Vec<ManifestSource>) {
    if let Some(reference) = module.as_str() {
        info!("Skipping module file reference {} at {}", reference, path);
        return;
    }
    let name = module
        .get("name")
        .and_then(Node::as_str)
        .unwrap_or("unnamed");

    if let Some(children) = module.get("modules") {
        if !children.is_sequence() {
            warn!("\"modules\" in {} is not a list", name);
        }
        for (i, child) in children.items().iter().enumerate() {
            collect_module(&format!("{path}/modules/{i}"), child, sources);
        }
    }

    if let Some(module_sources) = module.get("sources") {
        for (i, source) in module_sources.items().iter().enumerate() {
            collect_source(&format!("{path}/sources/{i}"), source, name, sources);
        }
    }
}

fn collect_source(path: &str, node: &Node, module: &str, sources: &mut Vec<ManifestSource>) {
    if let Some(reference) = node.as_str() {
        info!("Skipping source file reference {} at {}", reference, path);
        return;
    }
    let Some(kind) = node
        .get("type")
        .and_then(Node::as_str)
        .and_then(SourceKind::from_type)
    else {
        debug!("Skipping unsupported source at {}", path);
        return;
    };
    let Some(url) = node.get("url").and_then(Node::as_str).map(str::to_string) else {
        debug!("Skipping {} source without url at {}", kind.as_str(), path);
        return;
    };
    let text = |key: &str| node.get(key).and_then(Node::as_str).map(str::to_string);

    let (locator, filename) = if kind == SourceKind::Git {
        let filename = url_basename(&url).trim_end_matches(".git").to_string();
        let locator = Locator::Git {
            url,
            branch: text("branch"),
            tag: text("tag"),
            commit: text("commit"),
        };
        (locator, filename)
    } else {
        let name_key = if kind == SourceKind::ExtraData {
            "filename"
        } else {
            "dest-filename"
        };
        let filename = text(name_key).unwrap_or_else(|| url_basename(&url).to_string());
        (Locator::Url { url }, filename)
    };

    sources.push(ManifestSource {
        id: path.to_string(),
        module: module.to_string(),
        kind,
        filename,
        locator,
        digests: Digests {
            sha256: text("sha256"),
            sha512: text("sha512"),
        },
        size: node.get("size").and_then(Node::as_u64),
        arches: node
            .get("only-arches")
            .map(|arches| {
                arches
                    .items()
                    .iter()
                    .filter_map(Node::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        checker_data: node.get(CHECKER_DATA_KEY).map(Node::to_json),
    });
}

/// Last non-empty path segment of a URL, ignoring query and fragment
pub fn url_basename(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(url)
}
