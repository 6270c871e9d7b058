// API client - shared HTTP client for the JSON-backed sources
//
// The client is built once at start-up from the `api_client` settings and
// shared by every source that talks to an HTTP API. It is modelled behind
// a trait so sources can be exercised against canned responses.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiClientConfig;

/// Query parameters whose values are secrets
const SECRET_PARAMS: [&str; 3] = ["apikey", "appid", "api_key"];

/// Errors raised by the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP client setup failed: {0}")]
    Build(#[source] reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),
}

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Minimal GET interface used by the scrape sources
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Performs a GET request. Any HTTP status is a successful transport;
    /// only network-level failures are errors.
    async fn get(&self, url: &str) -> Result<ApiResponse, ApiError>;
}

/// `reqwest`-backed implementation
pub struct HttpApiClient {
    client: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(config: &ApiClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ApiError::Build)?;

        Ok(HttpApiClient { client })
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn get(&self, url: &str) -> Result<ApiResponse, ApiError> {
        debug!("GET {}", redact_url(url));

        // Strip the URL from errors; it carries the API key
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Request(e.without_url()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Request(e.without_url()))?;

        debug!("{} -> {} ({} bytes)", redact_url(url), status, body.len());

        Ok(ApiResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Masks API keys in a URL so it can be logged
///
/// # Example
/// ```text
/// http://host/api?output=json&apikey=abc&mode=queue
/// becomes
/// http://host/api?output=json&apikey=****&mode=queue
/// ```
pub fn redact_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let params: Vec<String> = query
        .split('&')
        .map(|param| match param.split_once('=') {
            Some((key, _)) if SECRET_PARAMS.contains(&key) => format!("{key}=****"),
            _ => param.to_string(),
        })
        .collect();

    format!("{}?{}", base, params.join("&"))
}
