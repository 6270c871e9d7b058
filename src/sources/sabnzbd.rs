// SABnzbd source
//
// Polls the `queue` and `server_stats` API modes. The queue numbers arrive
// as decorated strings and are decoded through the numeric adapters; the
// per-server transfer totals are plain JSON numbers.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MeteredClient, ScrapeError, ScrapeSource};
use crate::apiclient::ApiClient;
use crate::config::SabnzbdConfig;
use crate::exposition::MetricsBackend;
use crate::numeric::{ClockDuration, HumanSize, QuotedFloat, QuotedUint, MEGA};
use crate::registry::MetricsRegistry;

const MODE_QUEUE: &str = "queue";
const MODE_SERVER: &str = "server_stats";

/// Key of the unlabelled queue-level gauge set
const QUEUE_KEY: &str = "queue";

const QUEUE_GAUGES: [(&str, &str); 16] = [
    ("download_speed_limit", "Download speed limit. Percent."),
    ("download_speed_limit_abs", "Absolute download speed limit."),
    ("download_speed", "Current download speed. Bytes per second."),
    ("download_kb_per_sec", "Current download speed. KB per second."),
    ("queue_mb_total", "Total size of the queue. Bytes."),
    ("queue_mb_left", "Remaining size of the queue. Bytes."),
    ("queue_mb_done", "Downloaded size of the queue. Bytes."),
    ("queue_size_total", "Total size of the queue as reported. Bytes."),
    ("queue_size_left", "Remaining size of the queue as reported. Bytes."),
    ("download_time_left", "Estimated time until the queue is done. Seconds."),
    ("job_slots_count", "Jobs in the queue."),
    ("job_slots_total", "Total job slots."),
    ("server_xfer_total", "Bytes transferred from all servers."),
    ("paused", "Is the queue paused?"),
    ("disk_space_1", "Free space on the download disk. GB."),
    ("disk_space_2", "Free space on the completed disk. GB."),
];

/// `mode=queue` response
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub queue: Queue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Queue {
    pub version: String,
    pub paused: bool,
    #[serde(rename = "diskspace1")]
    pub disk_space_1: QuotedFloat,
    #[serde(rename = "diskspace2")]
    pub disk_space_2: QuotedFloat,
    #[serde(rename = "speedlimit")]
    pub speed_limit: QuotedUint,
    #[serde(rename = "speedlimit_abs")]
    pub speed_limit_abs: QuotedFloat,
    pub speed: HumanSize,
    #[serde(rename = "kbpersec")]
    pub kb_per_sec: QuotedFloat,
    pub mb: QuotedFloat,
    #[serde(rename = "mbleft")]
    pub mb_left: QuotedFloat,
    pub size: HumanSize,
    #[serde(rename = "sizeleft")]
    pub size_left: HumanSize,
    #[serde(rename = "timeleft")]
    pub time_left: ClockDuration,
    #[serde(rename = "noofslots")]
    pub slots: u64,
    #[serde(rename = "noofslots_total")]
    pub slots_total: u64,
}

impl Queue {
    /// Megabytes already downloaded
    pub fn mb_done(&self) -> f64 {
        self.mb.as_f64() - self.mb_left.as_f64()
    }

    fn readings(&self) -> [(&'static str, f64); 15] {
        [
            ("download_speed_limit", self.speed_limit.as_f64()),
            ("download_speed_limit_abs", self.speed_limit_abs.as_f64()),
            ("download_speed", self.speed.as_f64()),
            ("download_kb_per_sec", self.kb_per_sec.as_f64()),
            ("queue_mb_total", self.mb.as_f64() * MEGA),
            ("queue_mb_left", self.mb_left.as_f64() * MEGA),
            ("queue_mb_done", self.mb_done() * MEGA),
            ("queue_size_total", self.size.as_f64()),
            ("queue_size_left", self.size_left.as_f64()),
            ("download_time_left", self.time_left.as_secs_f64()),
            ("job_slots_count", self.slots as f64),
            ("job_slots_total", self.slots_total as f64),
            ("paused", if self.paused { 1.0 } else { 0.0 }),
            ("disk_space_1", self.disk_space_1.as_f64()),
            ("disk_space_2", self.disk_space_2.as_f64()),
        ]
    }
}

/// `mode=server_stats` response
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerStats {
    pub total: u64,
    pub servers: BTreeMap<String, Server>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Server {
    pub total: u64,
}

/// SABnzbd scrape source
pub struct SabnzbdSource {
    config: SabnzbdConfig,
    api: MeteredClient,
    queue: MetricsRegistry,
    servers: MetricsRegistry,
}

impl SabnzbdSource {
    pub fn new(config: &SabnzbdConfig, backend: &MetricsBackend, client: Arc<dyn ApiClient>) -> Self {
        SabnzbdSource {
            config: config.clone(),
            api: MeteredClient::new(backend, "sabnzbd", client, config.limit),
            queue: MetricsRegistry::new(backend.clone(), "sabnzbd", None),
            servers: MetricsRegistry::new(backend.clone(), "sabnzbd", Some("server")),
        }
    }

    async fn scrape_queue(&mut self) -> Result<(), ScrapeError> {
        let url = self.config.url(MODE_QUEUE);
        let stats: QueueStats = self.api.get_json(&url, MODE_QUEUE).await?;
        let queue = stats.queue;

        debug!(
            "SABnzbd {}: {} jobs, {:.0} MB left",
            queue.version,
            queue.slots,
            queue.mb_left.as_f64()
        );

        let set = self.queue.get(QUEUE_KEY);
        for (name, value) in queue.readings() {
            set.set(name, value);
        }

        Ok(())
    }

    async fn scrape_servers(&mut self) -> Result<(), ScrapeError> {
        let url = self.config.url(MODE_SERVER);
        let stats: ServerStats = self.api.get_json(&url, MODE_SERVER).await?;

        self.queue
            .get(QUEUE_KEY)
            .set("server_xfer_total", stats.total as f64);

        for (name, server) in &stats.servers {
            let set = self.servers.get(name);
            set.declare("xfer", "Bytes transferred from this server.");
            set.set("xfer", server.total as f64);
        }

        Ok(())
    }
}

#[async_trait]
impl ScrapeSource for SabnzbdSource {
    fn name(&self) -> &str {
        "sabnzbd"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval)
    }

    async fn setup(&mut self) -> Result<(), ScrapeError> {
        let set = self.queue.get(QUEUE_KEY);
        for (name, help) in QUEUE_GAUGES {
            set.declare(name, help);
        }
        Ok(())
    }

    /// Queue and server statistics are independent calls; a failure of the
    /// first does not prevent the second from publishing.
    async fn scrape(&mut self) -> Result<(), ScrapeError> {
        let queue = self.scrape_queue().await;
        if let Err(e) = &queue {
            warn!(source = "sabnzbd", "Queue scrape failed: {}", e);
        }

        let servers = self.scrape_servers().await;

        queue.and(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CannedApi;

    const QUEUE: &str = r#"{"queue": {
        "version": "4.2.1",
        "paused": false,
        "diskspace1": "161.46",
        "diskspace2": "161.46",
        "speedlimit": "85",
        "speedlimit_abs": "10485760",
        "speed": "1.2 M",
        "kbpersec": "1228.80",
        "mb": "2048.00",
        "mbleft": "512.00",
        "size": "2.0 GB",
        "sizeleft": "512 MB",
        "timeleft": "0:05:30",
        "noofslots": 3,
        "noofslots_total": 5,
        "slots": []
    }}"#;

    const SERVERS: &str = r#"{
        "total": 5000,
        "day": 100, "week": 200, "month": 300,
        "servers": {
            "news.example.com": {"total": 3000, "day": 10},
            "backup.example.com": {"total": 2000}
        }
    }"#;

    fn config() -> SabnzbdConfig {
        SabnzbdConfig {
            base_url: "http://nzb".to_string(),
            api_key: "k".to_string(),
            ..SabnzbdConfig::default()
        }
    }

    fn queue_value(backend: &MetricsBackend, name: &str) -> Option<f64> {
        backend.value(&format!("sabnzbd_{name}"), &[])
    }

    #[tokio::test]
    async fn test_scrape_decodes_queue_and_servers() {
        let backend = MetricsBackend::new();
        let api = Arc::new(
            CannedApi::new()
                .route("mode=queue", 200, QUEUE)
                .route("mode=server_stats", 200, SERVERS),
        );
        let mut source = SabnzbdSource::new(&config(), &backend, api);

        source.setup().await.unwrap();
        source.scrape().await.unwrap();

        assert_eq!(queue_value(&backend, "download_speed_limit"), Some(85.0));
        assert_eq!(queue_value(&backend, "download_speed"), Some(1.2 * 1.049e6));
        assert_eq!(queue_value(&backend, "queue_mb_total"), Some(2048.0 * 1.049e6));
        assert_eq!(queue_value(&backend, "queue_mb_done"), Some(1536.0 * 1.049e6));
        assert_eq!(queue_value(&backend, "queue_size_total"), Some(2.0 * 1.074e9));
        assert_eq!(queue_value(&backend, "download_time_left"), Some(330.0));
        assert_eq!(queue_value(&backend, "job_slots_total"), Some(5.0));
        assert_eq!(queue_value(&backend, "paused"), Some(0.0));
        assert_eq!(queue_value(&backend, "server_xfer_total"), Some(5000.0));
        assert_eq!(
            backend.value("sabnzbd_xfer", &[("server", "news.example.com")]),
            Some(3000.0)
        );
        assert_eq!(backend.count("sabnzbd_xfer"), 2);
    }

    #[tokio::test]
    async fn test_queue_failure_still_publishes_servers() {
        let backend = MetricsBackend::new();
        let api = Arc::new(
            CannedApi::new()
                .route("mode=queue", 200, r#"{"queue": {"timeleft": "soon"}}"#)
                .route("mode=server_stats", 200, SERVERS),
        );
        let mut source = SabnzbdSource::new(&config(), &backend, api);
        source.setup().await.unwrap();

        let err = source.scrape().await.unwrap_err();

        assert!(matches!(err, ScrapeError::Decode { ref call, .. } if call == "queue"));
        assert_eq!(queue_value(&backend, "download_time_left"), Some(0.0));
        assert_eq!(queue_value(&backend, "server_xfer_total"), Some(5000.0));
    }

    #[tokio::test]
    async fn test_unlimited_by_default() {
        let backend = MetricsBackend::new();
        let api = Arc::new(CannedApi::new().route("mode", 200, "{}"));
        let mut source = SabnzbdSource::new(&config(), &backend, api);

        // An empty object decodes to the defaults for both modes
        source.scrape().await.unwrap();

        assert_eq!(
            backend.value("exporter_calls", &[("exporter", "sabnzbd")]),
            Some(2.0)
        );
        assert_eq!(backend.value("exporter_limit", &[("exporter", "sabnzbd")]), None);
    }
}
