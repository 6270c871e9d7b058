// Sources module - defines the scrape/publish contract shared by every probe
//
// Each probed system (weather API, SABnzbd, Netgear switches, ping targets,
// DNS names) is a `ScrapeSource`. The scheduler drives all of them the same
// way: `setup` once at start-up, then `scrape` every `interval`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::apiclient::ApiClient;
use crate::config::{AppConfig, SourceKind};
use crate::exposition::MetricsBackend;
use crate::quota::CallQuota;
use crate::registry::EntitySet;

pub mod dns;
pub mod icmp;
pub mod netgear;
pub mod sabnzbd;
pub mod weather;

/// Why a single scrape failed
///
/// All variants are recovered at the scrape boundary: the scheduler logs
/// them, previously published values stay in place, and the next tick
/// starts fresh.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The payload did not have the expected shape or encoding
    #[error("{call}: malformed payload: {reason}")]
    Decode { call: String, reason: String },

    /// Network, HTTP status or timeout failure
    #[error("{call}: {reason}")]
    Transport { call: String, reason: String },

    /// The daily quota for a metered API is used up
    #[error("daily call limit of {limit} exceeded")]
    CallLimitExceeded { limit: u32 },

    /// A discovered device answered without the data that identifies it
    #[error("device {device}: {reason}")]
    Protocol { device: String, reason: String },
}

impl ScrapeError {
    pub fn decode(call: impl Into<String>, reason: impl Display) -> Self {
        ScrapeError::Decode {
            call: call.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(call: impl Into<String>, reason: impl Display) -> Self {
        ScrapeError::Transport {
            call: call.into(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(device: impl Into<String>, reason: impl Display) -> Self {
        ScrapeError::Protocol {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// Contract every probed source implements.
///
/// Lifecycle: constructed → `setup` (once) → `scrape` every `interval`,
/// forever. Calls on one source are never concurrent; the scheduler owns
/// each source in its own task.
#[async_trait]
pub trait ScrapeSource: Send {
    /// Source name used in logs and in the `exporter` label
    fn name(&self) -> &str;

    /// Fixed time between two scrapes
    fn interval(&self) -> Duration;

    /// Declares every gauge reachable from static configuration.
    ///
    /// Sources that discover their entities at runtime declare lazily in
    /// `scrape` instead and keep the default no-op.
    async fn setup(&mut self) -> Result<(), ScrapeError> {
        Ok(())
    }

    /// Runs one fetch-decode-publish cycle.
    ///
    /// Values that were already written before a failure stay written;
    /// everything else keeps its previous value.
    async fn scrape(&mut self) -> Result<(), ScrapeError>;
}

/// API client wrapped with a daily call quota and its self-metrics
///
/// Publishes `exporter_calls` and `exporter_limit` labelled with the
/// owning source's name.
pub struct MeteredClient {
    client: Arc<dyn ApiClient>,
    quota: CallQuota,
    gauges: EntitySet,
}

impl MeteredClient {
    pub fn new(
        backend: &MetricsBackend,
        source: &str,
        client: Arc<dyn ApiClient>,
        limit: Option<u32>,
    ) -> Self {
        let quota = CallQuota::new(limit);
        let mut gauges = EntitySet::new(backend.clone(), "exporter", Some(("exporter", source)));
        gauges.declare("calls", "API calls made today.");

        if let Some(limit) = quota.limit() {
            gauges.declare("limit", "Daily API call limit.");
            gauges.set("limit", f64::from(limit));
        }

        MeteredClient {
            client,
            quota,
            gauges,
        }
    }

    /// Fetches `url` and decodes the JSON body
    ///
    /// # Errors
    /// * `CallLimitExceeded` - quota used up; no request is sent
    /// * `Transport` - network failure or non-200 status
    /// * `Decode` - body is not the expected JSON
    pub async fn get_json<T: DeserializeOwned>(
        &mut self,
        url: &str,
        call: &str,
    ) -> Result<T, ScrapeError> {
        // A new day resets the counter even if the call below fails
        let allowed = self.quota.check();
        self.gauges.set("calls", f64::from(self.calls()));
        allowed?;

        let response = self
            .client
            .get(url)
            .await
            .map_err(|e| ScrapeError::transport(call, e))?;

        self.quota.record();
        self.gauges.set("calls", f64::from(self.calls()));

        if response.status != 200 {
            return Err(ScrapeError::transport(
                call,
                format!("{} response", response.status),
            ));
        }

        serde_json::from_slice(&response.body).map_err(|e| ScrapeError::decode(call, e))
    }

    /// Calls made today
    pub fn calls(&self) -> u32 {
        self.quota.calls()
    }
}

/// Builds every source listed in `enabled`.
///
/// Unlisted kinds are skipped entirely: nothing is declared and no client
/// is created for them.
///
/// # Errors
/// Fails when a source cannot acquire its resources (e.g. the discovery
/// socket cannot be bound). Start-up treats this as fatal.
pub async fn build_enabled(
    config: &AppConfig,
    backend: &MetricsBackend,
    api: Arc<dyn ApiClient>,
) -> Result<Vec<Box<dyn ScrapeSource>>, ScrapeError> {
    let mut sources: Vec<Box<dyn ScrapeSource>> = Vec::new();

    for kind in config.enabled_sources() {
        let source: Box<dyn ScrapeSource> = match kind {
            SourceKind::OpenWeatherMap => match &config.openweathermap {
                Some(cnf) => Box::new(weather::WeatherSource::new(cnf, backend, api.clone())),
                None => continue,
            },
            SourceKind::Sabnzbd => match &config.sabnzbd {
                Some(cnf) => Box::new(sabnzbd::SabnzbdSource::new(cnf, backend, api.clone())),
                None => continue,
            },
            SourceKind::Netgear => match &config.netgear {
                Some(cnf) => Box::new(netgear::NetgearSource::connect(cnf, backend).await?),
                None => continue,
            },
            SourceKind::Icmp => match &config.icmp {
                Some(cnf) => Box::new(icmp::IcmpSource::new(cnf, backend)),
                None => continue,
            },
            SourceKind::Dns => match &config.dns {
                Some(cnf) => Box::new(dns::DnsSource::new(cnf, backend)),
                None => continue,
            },
        };

        info!(
            "Constructed source '{}' (every {}s)",
            source.name(),
            source.interval().as_secs()
        );
        sources.push(source);
    }

    if sources.is_empty() {
        warn!("No scrape sources were constructed");
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiclient::HttpApiClient;
    use crate::config::ApiClientConfig;
    use crate::testutil::CannedApi;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Answer {
        value: u32,
    }

    #[tokio::test]
    async fn test_metered_client_decodes_and_counts() {
        let backend = MetricsBackend::new();
        let api = Arc::new(CannedApi::new().route("answer", 200, r#"{"value": 42}"#));
        let mut client = MeteredClient::new(&backend, "test", api.clone(), Some(5));

        let answer: Answer = client.get_json("http://x/answer", "answer").await.unwrap();

        assert_eq!(answer.value, 42);
        assert_eq!(client.calls(), 1);
        assert_eq!(backend.value("exporter_calls", &[("exporter", "test")]), Some(1.0));
        assert_eq!(backend.value("exporter_limit", &[("exporter", "test")]), Some(5.0));
    }

    #[tokio::test]
    async fn test_call_limit_stops_before_fetching() {
        let backend = MetricsBackend::new();
        let api = Arc::new(CannedApi::new().route("answer", 200, r#"{"value": 1}"#));
        let mut client = MeteredClient::new(&backend, "test", api.clone(), Some(2));

        for _ in 0..2 {
            client
                .get_json::<Answer>("http://x/answer", "answer")
                .await
                .unwrap();
        }
        let third = client.get_json::<Answer>("http://x/answer", "answer").await;

        assert!(matches!(third, Err(ScrapeError::CallLimitExceeded { limit: 2 })));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_200_and_bad_json() {
        let backend = MetricsBackend::new();
        let api = Arc::new(
            CannedApi::new()
                .route("down", 503, "unavailable")
                .route("garbage", 200, "not json"),
        );
        let mut client = MeteredClient::new(&backend, "test", api, None);

        let down = client.get_json::<Answer>("http://x/down", "down").await;
        assert!(matches!(down, Err(ScrapeError::Transport { ref reason, .. }) if reason == "503 response"));

        let garbage = client.get_json::<Answer>("http://x/garbage", "garbage").await;
        assert!(matches!(garbage, Err(ScrapeError::Decode { ref call, .. }) if call == "garbage"));

        // Both calls reached the API and count against the quota
        assert_eq!(client.calls(), 2);
        assert_eq!(backend.value("exporter_limit", &[("exporter", "test")]), None);
    }

    #[tokio::test]
    async fn test_new_day_resets_calls_gauge_when_fetch_fails() {
        let backend = MetricsBackend::new();
        let api = HttpApiClient::new(&ApiClientConfig::default()).unwrap();
        let mut client = MeteredClient::new(&backend, "test", Arc::new(api), Some(5));

        let yesterday = chrono::Local::now().date_naive() - chrono::Duration::days(1);
        client.quota = CallQuota::starting(Some(5), yesterday);
        for _ in 0..3 {
            client.quota.record();
        }
        client.gauges.set("calls", 3.0);

        // Nothing listens on port 1
        let result = client
            .get_json::<Answer>("http://127.0.0.1:1/answer", "answer")
            .await;

        assert!(matches!(result, Err(ScrapeError::Transport { .. })));
        assert_eq!(client.calls(), 0);
        assert_eq!(backend.value("exporter_calls", &[("exporter", "test")]), Some(0.0));
    }

    #[tokio::test]
    async fn test_build_enabled_skips_unlisted_kinds() {
        let mut config: AppConfig = serde_json::from_str(
            r#"{
                "enabled": ["dns", "icmp"],
                "dns": {"hosts": ["example.com"]},
                "icmp": {"hosts": []},
                "sabnzbd": {"base_url": "http://nzb"}
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        let backend = MetricsBackend::new();
        let sources = build_enabled(&config, &backend, Arc::new(CannedApi::new()))
            .await
            .unwrap();

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["dns", "icmp"]);
    }
}
