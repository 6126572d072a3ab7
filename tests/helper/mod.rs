//! Test utilities shared by the end-to-end scenarios

#![allow(dead_code)]

mod collaborators;

pub use collaborators::{FakeFetcher, FakeGit, FakeQuery};

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use external_data_checker::check::Collaborators;
use external_data_checker::config::Endpoints;
use external_data_checker::manifest::{Format, Manifest};
use external_data_checker::orchestrator::{Orchestrator, RunOptions};

/// Options with digest completion off and no deadline
pub fn options() -> RunOptions {
    RunOptions {
        concurrency: 4,
        timeout: None,
        complete_digests: false,
    }
}

pub fn create_orchestrator(fetcher: FakeFetcher, git: FakeGit, options: RunOptions) -> Orchestrator {
    create_orchestrator_with(Arc::new(fetcher), git, options)
}

/// Keeps a handle on `fetcher` so a test can inspect its requests afterwards
pub fn create_orchestrator_with(fetcher: Arc<FakeFetcher>, git: FakeGit, options: RunOptions) -> Orchestrator {
    let collaborators = Collaborators {
        fetcher,
        git: Arc::new(git),
        query: Arc::new(FakeQuery),
    };
    Orchestrator::new(collaborators, Endpoints::default(), options)
}

pub fn json_manifest(text: &str) -> Manifest {
    Manifest::parse(Format::Json, "org.example.App", text.to_string()).unwrap()
}

pub fn yaml_manifest(text: &str) -> Manifest {
    Manifest::parse(Format::Yaml, "org.example.App", text.to_string()).unwrap()
}

/// Writes `content` to `name` inside a fresh temporary directory
pub fn write_manifest(name: &str, content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (temp_dir, path)
}
