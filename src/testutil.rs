// Test doubles shared by the unit tests of several modules

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::apiclient::{ApiClient, ApiError, ApiResponse};

/// API client answering from a fixed routing table
///
/// The first route whose pattern is contained in the requested URL wins;
/// unmatched URLs get a 404.
#[derive(Default)]
pub struct CannedApi {
    routes: Vec<(String, ApiResponse)>,
    calls: AtomicUsize,
}

impl CannedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: &str, status: u16, body: &str) -> Self {
        self.routes.push((
            pattern.to_string(),
            ApiResponse {
                status,
                body: body.as_bytes().to_vec(),
            },
        ));
        self
    }

    /// Requests received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for CannedApi {
    async fn get(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let response = self
            .routes
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(ApiResponse {
                status: 404,
                body: Vec::new(),
            });

        Ok(response)
    }
}
