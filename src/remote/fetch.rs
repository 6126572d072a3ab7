//! HTTP fetch collaborator used by every checker

use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::remote::error::FetchError;

const USER_AGENT: &str = concat!("external-data-checker/", env!("CARGO_PKG_VERSION"));

/// Host that receives the `GITHUB_TOKEN` bearer token
const GITHUB_API_HOST: &str = "api.github.com";

/// A GET request with optional extra headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully read response body and the URL it was served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub final_url: String,
    pub body: Vec<u8>,
}

impl Fetched {
    pub fn text(&self) -> Result<&str, FetchError> {
        std::str::from_utf8(&self.body).map_err(|e| {
            FetchError::InvalidResponse(format!("{} is not valid UTF-8: {}", self.final_url, e))
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            warn!("Failed to parse JSON from {}: {}", self.final_url, e);
            FetchError::InvalidResponse(format!("{}: {}", self.final_url, e))
        })
    }
}

/// Trait for retrieving remote documents
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads the whole response body, following redirects
    ///
    /// # Returns
    /// * `Err(FetchError::NotFound)` - the server answered 404 or 410
    /// * `Err(FetchError::RateLimited)` - the server answered 429
    async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, FetchError>;

    /// Follows redirects from `url` and returns the final URL without reading the body
    async fn resolve(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest-backed [`Fetcher`]
pub struct HttpFetcher {
    client: reqwest::Client,
    github_token: Option<String>,
}

impl HttpFetcher {
    pub fn new(timeout: Option<Duration>, connect_timeout: Duration) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            github_token: None,
        })
    }

    /// Picks up `GITHUB_TOKEN` from the environment
    pub fn with_env_token(mut self) -> Self {
        self.github_token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());
        self
    }

    fn authorization_for(&self, url: &str) -> Option<String> {
        let token = self.github_token.as_ref()?;
        let parsed = Url::parse(url).ok()?;
        (parsed.scheme() == "https" && parsed.host_str() == Some(GITHUB_API_HOST))
            .then(|| format!("token {}", token))
    }

    async fn send(&self, request: &FetchRequest) -> Result<reqwest::Response, FetchError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = self.authorization_for(&request.url) {
            builder = builder.header("Authorization", auth);
        }

        debug!("GET {}", request.url);
        let response = builder.send().await?;
        check_status(response, &request.url)
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response, FetchError> {
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return Err(FetchError::NotFound(url.to_string()));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(FetchError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !status.is_success() {
        warn!("{} returned status {}", url, status);
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response)
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Fetched, FetchError> {
        let response = self.send(request).await?;
        let final_url = response.url().to_string();
        let body = response.bytes().await?.to_vec();

        Ok(Fetched { final_url, body })
    }

    async fn resolve(&self, url: &str) -> Result<String, FetchError> {
        let response = self.send(&FetchRequest::get(url)).await?;
        Ok(response.url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serial_test::serial;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Some(Duration::from_secs(5)), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetch_returns_body_and_final_url_after_redirect() {
        let mut server = Server::new_async().await;
        let target = format!("{}/v1.1.0.tar.gz", server.url());

        let redirect = server
            .mock("GET", "/latest.tar.gz")
            .with_status(302)
            .with_header("location", &target)
            .create_async()
            .await;
        let file = server
            .mock("GET", "/v1.1.0.tar.gz")
            .with_status(200)
            .with_body("archive")
            .create_async()
            .await;

        let result = fetcher()
            .fetch(&FetchRequest::get(format!("{}/latest.tar.gz", server.url())))
            .await
            .unwrap();

        redirect.assert_async().await;
        file.assert_async().await;
        assert_eq!(result.final_url, target);
        assert_eq!(result.body, b"archive");
    }

    #[tokio::test]
    async fn fetch_sends_extra_headers() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/info")
            .match_header("snap-device-series", "16")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        fetcher()
            .fetch(&FetchRequest::get(format!("{}/info", server.url())).header("Snap-Device-Series", "16"))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_maps_404_to_not_found() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let result = fetcher()
            .fetch(&FetchRequest::get(format!("{}/missing", server.url())))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn fetch_maps_429_to_rate_limited() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/busy")
            .with_status(429)
            .with_header("retry-after", "60")
            .create_async()
            .await;

        let result = fetcher()
            .fetch(&FetchRequest::get(format!("{}/busy", server.url())))
            .await;

        mock.assert_async().await;
        assert!(matches!(
            result,
            Err(FetchError::RateLimited {
                retry_after_secs: Some(60)
            })
        ));
    }

    #[tokio::test]
    async fn fetch_maps_server_error_to_status() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/broken")
            .with_status(503)
            .create_async()
            .await;

        let result = fetcher()
            .fetch(&FetchRequest::get(format!("{}/broken", server.url())))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn resolve_returns_redirect_target() {
        let mut server = Server::new_async().await;
        let target = format!("{}/app-2.0.AppImage", server.url());

        let _redirect = server
            .mock("GET", "/download")
            .with_status(301)
            .with_header("location", &target)
            .create_async()
            .await;
        let _file = server
            .mock("GET", "/app-2.0.AppImage")
            .with_status(200)
            .create_async()
            .await;

        let result = fetcher()
            .resolve(&format!("{}/download", server.url()))
            .await
            .unwrap();

        assert_eq!(result, target);
    }

    #[test]
    #[serial]
    fn authorization_is_sent_only_to_github_api() {
        // SAFETY: serialized with other tests touching the environment
        unsafe { std::env::set_var("GITHUB_TOKEN", "secret") };
        let fetcher = fetcher().with_env_token();
        unsafe { std::env::remove_var("GITHUB_TOKEN") };

        assert_eq!(
            fetcher.authorization_for("https://api.github.com/repos/a/b/releases"),
            Some("token secret".to_string())
        );
        assert_eq!(fetcher.authorization_for("https://example.com/api"), None);
        assert_eq!(fetcher.authorization_for("http://api.github.com/repos"), None);
    }

    #[test]
    #[serial]
    fn with_env_token_ignores_empty_token() {
        unsafe { std::env::set_var("GITHUB_TOKEN", "") };
        let fetcher = fetcher().with_env_token();
        unsafe { std::env::remove_var("GITHUB_TOKEN") };

        assert_eq!(
            fetcher.authorization_for("https://api.github.com/repos/a/b"),
            None
        );
    }
}
