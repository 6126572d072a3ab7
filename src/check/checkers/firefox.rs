//! Firefox release tarball and language packs from `archive.mozilla.org`

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::check::checker::{CheckContext, Checker};
use crate::check::error::CheckError;
use crate::check::state::VersionState;
use crate::config::Endpoints;
use crate::manifest::source::ManifestSource;
use crate::remote::digest::Digests;
use crate::remote::fetch::FetchRequest;

const PLATFORM: &str = "linux-x86_64";
const BROWSER_LANGUAGE: &str = "en-US";
const LANGPACK_SUFFIX: &str = ".xpi";

static BROWSER_TARBALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^firefox-.+\.tar\.(bz2|xz)$").expect("valid tarball regex"));

pub struct FirefoxChecker {
    product_details_url: String,
    archive_url: String,
}

#[derive(Debug, Deserialize)]
struct FirefoxVersions {
    #[serde(rename = "LATEST_FIREFOX_VERSION")]
    latest: String,
}

/// One `linux-x86_64/<dir>/<file>` line of `SHA256SUMS`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReleaseFile<'a> {
    sha256: &'a str,
    path: &'a str,
    dir: &'a str,
    name: &'a str,
}

fn release_files(sums: &str) -> Vec<ReleaseFile<'_>> {
    sums.lines()
        .filter_map(|line| {
            let (sha256, path) = line.split_once(char::is_whitespace)?;
            let path = path.trim();
            let mut parts = path.split('/');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(PLATFORM), Some(dir), Some(name), None) => Some(ReleaseFile {
                    sha256,
                    path,
                    dir,
                    name,
                }),
                _ => None,
            }
        })
        .collect()
}

impl FirefoxChecker {
    pub fn new(endpoints: &Endpoints) -> Self {
        Self {
            product_details_url: endpoints.firefox_product_details.trim_end_matches('/').to_string(),
            archive_url: endpoints.firefox_archive.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Checker for FirefoxChecker {
    fn type_name(&self) -> &'static str {
        "firefox"
    }

    async fn check(
        &self,
        source: &ManifestSource,
        ctx: &CheckContext,
    ) -> Result<Option<VersionState>, CheckError> {
        if source.is_git() {
            return Err(CheckError::UnsupportedSource {
                checker: self.type_name(),
                source_kind: source.kind.as_str(),
            });
        }

        let versions_url = format!("{}/firefox_versions.json", self.product_details_url);
        let versions: FirefoxVersions = ctx
            .fetcher()
            .fetch(&FetchRequest::get(versions_url))
            .await?
            .json()?;
        let version = versions.latest;
        debug!("{}: latest Firefox is {}", source.display_name(), version);

        let release_url = format!("{}/{}", self.archive_url, version);
        let sums = ctx
            .fetcher()
            .fetch(&FetchRequest::get(format!("{}/SHA256SUMS", release_url)))
            .await?;
        let files = release_files(sums.text()?);

        let langpack = source.filename.ends_with(LANGPACK_SUFFIX);
        let file = files.iter().find(|file| {
            if langpack {
                file.name == source.filename
            } else {
                file.dir == BROWSER_LANGUAGE && BROWSER_TARBALL.is_match(file.name)
            }
        });
        let Some(file) = file else {
            let wanted = if langpack {
                source.filename.clone()
            } else {
                format!("{} tarball", BROWSER_LANGUAGE)
            };
            return Err(CheckError::InvalidResponse(format!("Firefox {} has no {}", version, wanted)));
        };

        Ok(Some(
            VersionState::url(format!("{}/{}", release_url, file.path))
                .with_version(version)
                .with_digests(Digests::sha256(file.sha256)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::checkers::test_support::{http_context, url_source};
    use mockito::{Mock, Server, ServerGuard};
    use rstest::rstest;

    const SUMS: &str = "\
aaa  linux-i686/en-US/firefox-125.0.tar.bz2
bbb  linux-x86_64/de/firefox-125.0.tar.bz2
ccc  linux-x86_64/en-US/firefox-125.0.tar.bz2
ddd  linux-x86_64/xpi/de.xpi
eee  linux-x86_64/xpi/fr.xpi
fff  mac/en-US/Firefox 125.0.dmg
";

    #[test]
    fn release_files_keeps_linux_x86_64_entries() {
        let files = release_files(SUMS);

        assert_eq!(files.len(), 4);
        assert_eq!(
            files[1],
            ReleaseFile {
                sha256: "ccc",
                path: "linux-x86_64/en-US/firefox-125.0.tar.bz2",
                dir: "en-US",
                name: "firefox-125.0.tar.bz2",
            }
        );
    }

    async fn serve(server: &mut ServerGuard) -> (FirefoxChecker, Vec<Mock>) {
        let versions = server
            .mock("GET", "/firefox_versions.json")
            .with_status(200)
            .with_body(r#"{"LATEST_FIREFOX_VERSION": "125.0", "FIREFOX_ESR": "115.10.0esr"}"#)
            .create_async()
            .await;
        let sums = server
            .mock("GET", "/releases/125.0/SHA256SUMS")
            .with_status(200)
            .with_body(SUMS)
            .create_async()
            .await;
        let checker = FirefoxChecker::new(&Endpoints {
            firefox_product_details: server.url(),
            firefox_archive: format!("{}/releases", server.url()),
            ..Endpoints::default()
        });
        (checker, vec![versions, sums])
    }

    #[rstest]
    #[case("firefox.tar.bz2", "linux-x86_64/en-US/firefox-125.0.tar.bz2", "ccc")]
    #[case("de.xpi", "linux-x86_64/xpi/de.xpi", "ddd")]
    #[tokio::test]
    async fn check_resolves_file_from_sums(
        #[case] filename: &str,
        #[case] path: &str,
        #[case] sha256: &str,
    ) {
        let mut server = Server::new_async().await;
        let (checker, _mocks) = serve(&mut server).await;
        let mut source = url_source("https://archive.mozilla.org/pub/firefox/releases/124.0/x");
        source.filename = filename.to_string();

        let state = checker.check(&source, &http_context()).await.unwrap().unwrap();

        assert_eq!(state.locator.url(), format!("{}/releases/125.0/{}", server.url(), path));
        assert_eq!(state.version.as_deref(), Some("125.0"));
        assert_eq!(state.digests, Digests::sha256(sha256));
    }

    #[tokio::test]
    async fn check_dropped_langpack_is_invalid_response() {
        let mut server = Server::new_async().await;
        let (checker, _mocks) = serve(&mut server).await;
        let mut source = url_source("https://archive.mozilla.org/pub/firefox/releases/124.0/x");
        source.filename = "ast.xpi".to_string();

        let error = checker.check(&source, &http_context()).await.unwrap_err();

        assert!(matches!(error, CheckError::InvalidResponse(_)));
    }
}
