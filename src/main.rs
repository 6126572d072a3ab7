use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use external_data_checker::check::{Collaborators, Status};
use external_data_checker::config::{self, Settings};
use external_data_checker::history::History;
use external_data_checker::logging::{self, LogOptions};
use external_data_checker::manifest::{Manifest, accepted_updates, apply};
use external_data_checker::orchestrator::{Orchestrator, RunOptions, RunReport};
use external_data_checker::remote::{GitCli, HttpFetcher, JqRunner};

/// Exit code for failures that prevented a complete run
const RUN_FAILURE: u8 = 3;

#[derive(Parser)]
#[command(name = "external-data-checker")]
#[command(version, about = "Check external sources of a build manifest for upstream updates")]
struct Cli {
    /// Manifest to check (.json, .yml or .yaml)
    manifest: PathBuf,

    /// Rewrite the manifest in place with the updates found
    #[arg(long)]
    update: bool,

    /// JSON settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of checks running at the same time
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Overall timeout for the run, in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Do not download new sources to compute missing digests
    #[arg(long)]
    no_complete_digests: bool,

    /// Only update when an important source has an update
    #[arg(long)]
    require_important_update: bool,

    /// Report a source BROKEN after N consecutive ERROR runs
    #[arg(long, value_name = "N")]
    promote_errors_after: Option<u32>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON log lines on stderr
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = Some(timeout);
        }
        if self.no_complete_digests {
            settings.complete_digests = false;
        }
        if self.require_important_update {
            settings.require_important_update = true;
        }
        if let Some(count) = self.promote_errors_after {
            settings.promote_errors_after = Some(count);
        }
        Ok(settings)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
    };
    let _guard = match logging::init(&options, &config::data_dir()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    };

    match run(&cli) {
        Ok(status) => exit_code(status),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(RUN_FAILURE)
        }
    }
}

fn exit_code(status: Status) -> ExitCode {
    match status {
        Status::Current | Status::Updatable => ExitCode::SUCCESS,
        Status::Error => ExitCode::from(1),
        Status::Broken => ExitCode::from(2),
    }
}

fn run(cli: &Cli) -> anyhow::Result<Status> {
    let settings = cli.settings().context("Failed to load settings")?;
    let manifest = Manifest::load(&cli.manifest, settings.max_manifest_size)
        .with_context(|| format!("Failed to load manifest {}", cli.manifest.display()))?;

    let collaborators = Collaborators {
        fetcher: Arc::new(
            HttpFetcher::new(None, settings.connect_timeout())
                .context("Failed to create HTTP client")?
                .with_env_token(),
        ),
        git: Arc::new(GitCli::default()),
        query: Arc::new(JqRunner::default()),
    };
    let orchestrator = Orchestrator::new(
        collaborators,
        settings.endpoints.clone(),
        RunOptions::from_settings(&settings),
    );

    let mut report = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(orchestrator.run(&manifest))
        .context("Manifest sources cannot be checked")?;

    if let Some(count) = settings.promote_errors_after {
        record_history(&cli.manifest, count, &mut report)?;
    }
    print_report(&report, cli.json)?;

    if cli.update {
        update_manifest(&cli.manifest, &manifest, &report, &settings)?;
    }
    Ok(report.outcome())
}

fn record_history(path: &Path, promote_after: u32, report: &mut RunReport) -> anyhow::Result<()> {
    let db_path = config::history_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    History::open(&db_path, promote_after)
        .and_then(|history| history.record(&key.display().to_string(), &mut report.states))
        .context("Failed to update run history")
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        return Ok(());
    }
    for line in report.lines() {
        println!("{}", line);
    }
    info!("{}", report.summary());
    Ok(())
}

fn update_manifest(
    path: &Path,
    manifest: &Manifest,
    report: &RunReport,
    settings: &Settings,
) -> anyhow::Result<()> {
    let accepted = accepted_updates(&report.states, settings.require_important_update);
    let outcome = apply(manifest, &accepted).context("Failed to patch manifest")?;

    for name in &outcome.pending {
        warn!("{}: new version has no known digest, left unchanged", name);
    }
    if !outcome.is_changed() {
        info!("Nothing to update in {}", path.display());
        return Ok(());
    }

    std::fs::write(path, &outcome.content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    for change in &outcome.changes {
        info!("{}", change);
    }
    info!("Updated {} source(s) in {}", outcome.applied.len(), path.display());
    Ok(())
}
