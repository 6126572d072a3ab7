//! Checker implementations, one per `type`

pub mod anitya;
pub mod chromium;
pub mod debian_repo;
pub mod electron;
pub mod firefox;
pub mod git;
pub mod gnome;
pub mod html;
pub mod jetbrains;
pub mod json;
pub mod pypi;
pub mod rotating_url;
pub mod rust;
pub mod snapcraft;

use std::sync::Arc;

pub use anitya::AnityaChecker;
pub use chromium::ChromiumChecker;
pub use debian_repo::DebianRepoChecker;
pub use electron::ElectronChecker;
pub use firefox::FirefoxChecker;
pub use git::GitChecker;
pub use gnome::GnomeChecker;
pub use html::HtmlChecker;
pub use jetbrains::JetbrainsChecker;
pub use json::JsonChecker;
pub use pypi::PypiChecker;
pub use rotating_url::RotatingUrlChecker;
pub use rust::RustChecker;
pub use snapcraft::SnapcraftChecker;

use crate::check::checker::Checker;
use crate::check::config::CheckerKind;
use crate::check::error::ConfigError;
use crate::config::Endpoints;

/// Instantiates the checker for a parsed config
pub fn build_checker(
    kind: &CheckerKind,
    endpoints: &Endpoints,
) -> Result<Arc<dyn Checker>, ConfigError> {
    let checker: Arc<dyn Checker> = match kind {
        CheckerKind::RotatingUrl(config) => Arc::new(RotatingUrlChecker::new(config)?),
        CheckerKind::Html(config) => Arc::new(HtmlChecker::new(config)?),
        CheckerKind::Git(config) => Arc::new(GitChecker::new(config)?),
        CheckerKind::Json(config) => Arc::new(JsonChecker::new(config.clone())),
        CheckerKind::DebianRepo(config) => Arc::new(DebianRepoChecker::new(config.clone())),
        CheckerKind::Anitya(config) => {
            Arc::new(AnityaChecker::new(config.clone(), &endpoints.anitya))
        }
        CheckerKind::Gnome(config) => Arc::new(GnomeChecker::new(config.clone(), &endpoints.gnome)),
        CheckerKind::Pypi(config) => Arc::new(PypiChecker::new(config.clone(), &endpoints.pypi)),
        CheckerKind::ElectronUpdater(config) => Arc::new(ElectronChecker::new(config.clone())),
        CheckerKind::Jetbrains(config) => {
            Arc::new(JetbrainsChecker::new(config.clone(), &endpoints.jetbrains))
        }
        CheckerKind::Snapcraft(config) => {
            Arc::new(SnapcraftChecker::new(config.clone(), &endpoints.snapcraft))
        }
        CheckerKind::Rust(config) => Arc::new(RustChecker::new(config.clone(), &endpoints.rust)),
        CheckerKind::Chromium(config) => Arc::new(ChromiumChecker::new(*config, endpoints)),
        CheckerKind::Firefox(_) => Arc::new(FirefoxChecker::new(endpoints)),
    };
    Ok(checker)
}

/// Joins `reference` against `base`, leaving absolute URLs alone
pub(crate) fn join_url(base: &str, reference: &str) -> String {
    url::Url::parse(base)
        .and_then(|base| base.join(reference))
        .map(|joined| joined.to_string())
        .unwrap_or_else(|_| reference.to_string())
}
