//! Shared HTTP client construction and the browser header profile.
//!
//! The origin blocks obvious tool traffic, so every request carries a fixed
//! browser-like header set. The set lives in an immutable [`HeaderProfile`];
//! each request takes its own [`RequestHeaders`] snapshot and adds
//! per-request values (Origin/Referer, Range) to that copy only.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, ORIGIN, RANGE, REFERER,
};
use reqwest::{Client, ClientBuilder, Proxy, Response};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Browser User-Agent sent with every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Open-ended byte range used for the first attempt on every segment.
pub const OPEN_BYTE_RANGE: &str = "bytes=0-";

/// Errors building the shared client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// reqwest rejected the builder configuration.
    #[error("HTTP client construction failed: {0}")]
    Build(#[from] reqwest::Error),
    /// The builder panicked even with the env-proxy fallback.
    #[error("HTTP client construction panicked while loading proxy settings")]
    Panicked,
}

/// A failed fetch. Callers decide whether it is fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed.
    #[error("invalid URL {url}")]
    InvalidUrl {
        /// The URL.
        url: String,
    },
    /// Request exceeded the connect or total timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL.
        url: String,
    },
    /// Transport-level failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL.
        url: String,
        /// The underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL.
        url: String,
        /// The status code.
        status: u16,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Immutable base header set shared by every request of a [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    base: HeaderMap,
}

impl HeaderProfile {
    /// The desktop Chrome profile the origin expects.
    #[must_use]
    pub fn browser() -> Self {
        const PAIRS: [(&str, &str); 10] = [
            (
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
            ("accept-language", "en-US,en;q=0.9"),
            ("dnt", "1"),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "video"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "cross-site"),
            (
                "sec-ch-ua",
                "\"Chromium\";v=\"122\", \"Not(A:Brand\";v=\"24\", \"Google Chrome\";v=\"122\"",
            ),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"macOS\""),
        ];

        let mut base = HeaderMap::new();
        for (name, value) in PAIRS {
            base.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        Self { base }
    }

    /// Returns the number of base headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.base.len()
    }

    /// Returns true if the profile carries no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Takes a per-request copy of the base headers.
    #[must_use]
    pub fn snapshot(&self) -> RequestHeaders {
        RequestHeaders(self.base.clone())
    }
}

impl Default for HeaderProfile {
    fn default() -> Self {
        Self::browser()
    }
}

/// Headers for exactly one request (or one session, cloned per request).
#[derive(Debug, Clone)]
pub struct RequestHeaders(HeaderMap);

impl RequestHeaders {
    /// Sets Origin and Referer to the origin of `page`.
    #[must_use]
    pub fn with_origin_of(mut self, page: &Url) -> Self {
        let origin = page.origin().ascii_serialization();
        if origin != "null" {
            if let Ok(value) = HeaderValue::from_str(&origin) {
                self.0.insert(ORIGIN, value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("{origin}/")) {
                self.0.insert(REFERER, value);
            }
        }
        self
    }

    /// Adds a Range header.
    #[must_use]
    pub fn with_range(mut self, range: &'static str) -> Self {
        self.0.insert(RANGE, HeaderValue::from_static(range));
        self
    }

    /// Overrides Accept for playlist and segment requests.
    #[must_use]
    pub fn accept_any(mut self) -> Self {
        self.0.insert(ACCEPT, HeaderValue::from_static("*/*"));
        self
    }

    /// Returns true if a Range header is present.
    #[must_use]
    pub fn has_range(&self) -> bool {
        self.0.contains_key(RANGE)
    }

    /// Read access for assertions and logging.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }

    fn into_inner(self) -> HeaderMap {
        self.0
    }
}

/// Cloneable HTTP client with bounded timeouts and the shared header profile.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    profile: Arc<HeaderProfile>,
}

impl HttpClient {
    /// Builds a client with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] when reqwest rejects the configuration.
    pub fn new(
        profile: HeaderProfile,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ClientBuildError> {
        let client = build_client(connect_timeout, read_timeout)?;
        Ok(Self {
            client,
            profile: Arc::new(profile),
        })
    }

    /// Returns a fresh copy of the base headers.
    #[must_use]
    pub fn headers(&self) -> RequestHeaders {
        self.profile.snapshot()
    }

    /// Sends a GET with `headers` and returns the response if the status is 2xx.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on invalid URL, timeout, transport failure or
    /// non-success status.
    pub async fn get(&self, url: &str, headers: RequestHeaders) -> Result<Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .headers(headers.into_inner())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "non-success response");
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// GET and read the whole body as text.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get), plus body read failures.
    pub async fn get_text(&self, url: &str, headers: RequestHeaders) -> Result<String, FetchError> {
        let response = self.get(url, headers).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

pub(crate) fn read_error(url: &str, source: reqwest::Error) -> FetchError {
    FetchError::from_reqwest(url, source)
}

/// Where the client takes its proxy configuration from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxySource {
    /// reqwest's own lookup, including platform settings.
    System,
    /// Only `*_PROXY` environment variables.
    Environment,
}

const HTTPS_PROXY_VARS: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"];
const HTTP_PROXY_VARS: [&str; 4] = ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"];

/// Builds the shared client, retrying with environment proxies only when
/// the platform proxy lookup panics (seen in sandboxed macOS processes).
fn build_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, ClientBuildError> {
    for source in [ProxySource::System, ProxySource::Environment] {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            client_builder(connect_timeout, read_timeout, source).build()
        }));
        match attempt {
            Ok(built) => return built.map_err(ClientBuildError::Build),
            Err(_) if source == ProxySource::System => {
                warn!("system proxy lookup panicked; retrying with environment proxies");
            }
            Err(_) => {}
        }
    }
    Err(ClientBuildError::Panicked)
}

fn client_builder(
    connect_timeout: Duration,
    read_timeout: Duration,
    source: ProxySource,
) -> ClientBuilder {
    let mut defaults = HeaderMap::new();
    defaults.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    let builder = Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(defaults)
        .gzip(true);

    match source {
        ProxySource::System => builder,
        ProxySource::Environment => environment_proxies()
            .into_iter()
            .fold(builder.no_proxy(), ClientBuilder::proxy),
    }
}

/// Proxies named by the environment, HTTPS first. Unparseable values are skipped.
fn environment_proxies() -> Vec<Proxy> {
    let https = proxy_var(&HTTPS_PROXY_VARS).and_then(|url| Proxy::https(url).ok());
    let http = proxy_var(&HTTP_PROXY_VARS).and_then(|url| Proxy::http(url).ok());
    https.into_iter().chain(http).collect()
}

/// First non-blank value among `names`.
fn proxy_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}
