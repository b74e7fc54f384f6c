//! # HTTP Retrieval Utilities
//!
//! An asynchronous client wrapper around `reqwest` with retry middleware. The
//! map page is HTML, so responses are handed back as text together with the
//! transaction metadata.

use std::time::Duration;

use reqwest::{header::HeaderMap, Method};
use url::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

/// A standardized container for API responses.
///
/// Wraps the response body along with metadata about the HTTP transaction,
/// such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The response body on success.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// Transport settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    /// Transient-failure retries per request. Zero disables the middleware's
    /// retries entirely.
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
            user_agent: concat!("warwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs and automatic
/// retries of transient failures.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` instance with a retry policy.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the underlying client
    /// cannot be built.
    pub fn new(base_url: &str, options: &ClientOptions) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)?;

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.as_str())
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);

        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url: url,
        })
    }

    /// Performs a `GET` against `path` (relative to the base URL; an empty
    /// path targets the base URL itself) and returns the body as text.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, network execution or body
    /// decoding fails. Non-2xx responses are not errors; inspect `success`.
    pub async fn get_text(&self, path: &str) -> anyhow::Result<ApiResponse<String>> {
        self.request_text(Method::GET, path).await
    }

    async fn request_text(&self, method: Method, path: &str) -> anyhow::Result<ApiResponse<String>> {
        let full_url = self.base_url.join(path)?;
        let response: reqwest::Response = self.inner.request(method, full_url).send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let success = status.is_success();
        let body = response.text().await?;

        if success {
            Ok(ApiResponse {
                data: Some(body),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            Ok(ApiResponse {
                data: None,
                error_body: Some(body),
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}
