use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Defaults
// =============================================================================

/// Checks running at the same time
pub const DEFAULT_CONCURRENCY: usize = 8;

/// TCP connect timeout for every HTTP request (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Largest manifest accepted (100 KiB)
pub const DEFAULT_MAX_MANIFEST_SIZE: u64 = 100 * 1024;

const APP_DIR: &str = "external-data-checker";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Run settings, read from an optional JSON file and overridden by CLI flags
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub concurrency: usize,
    /// Overall run timeout in seconds
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    /// Download new sources whose digests the checker did not report
    pub complete_digests: bool,
    pub max_manifest_size: u64,
    /// Report a source BROKEN after this many consecutive ERROR runs
    pub promote_errors_after: Option<u32>,
    pub require_important_update: bool,
    pub endpoints: Endpoints,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            complete_digests: true,
            max_manifest_size: DEFAULT_MAX_MANIFEST_SIZE,
            promote_errors_after: None,
            require_important_update: false,
            endpoints: Endpoints::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Base URLs of the fixed-endpoint checkers
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoints {
    pub anitya: String,
    pub gnome: String,
    pub pypi: String,
    pub rust: String,
    pub snapcraft: String,
    pub jetbrains: String,
    pub chromium_dash: String,
    pub chromium_source: String,
    pub chromium_storage: String,
    pub chromium_mirror: String,
    pub firefox_product_details: String,
    pub firefox_archive: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            anitya: "https://release-monitoring.org".to_string(),
            gnome: "https://download.gnome.org".to_string(),
            pypi: "https://pypi.org/pypi".to_string(),
            rust: "https://static.rust-lang.org".to_string(),
            snapcraft: "http://api.snapcraft.io".to_string(),
            jetbrains: "https://data.services.jetbrains.com".to_string(),
            chromium_dash: "https://chromiumdash.appspot.com".to_string(),
            chromium_source: "https://chromium.googlesource.com".to_string(),
            chromium_storage: "https://commondatastorage.googleapis.com".to_string(),
            chromium_mirror: "https://chromium-tarballs.distfiles.gentoo.org".to_string(),
            firefox_product_details: "https://product-details.mozilla.org/1.0".to_string(),
            firefox_archive: "https://archive.mozilla.org/pub/firefox/releases".to_string(),
        }
    }
}

/// Returns the path to the data directory for external-data-checker.
/// Uses $XDG_DATA_HOME/external-data-checker if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/external-data-checker,
/// or ./external-data-checker if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the run history database.
pub fn history_path() -> PathBuf {
    data_dir().join("history.db")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join(APP_DIR)
}
