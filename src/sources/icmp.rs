// ICMP source - packet loss and round-trip times per host
//
// Pings are delegated to the system `ping` binary so the exporter does not
// need raw-socket privileges. Its summary lines are parsed for loss and
// min/avg/max/mdev RTT.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ScrapeError, ScrapeSource};
use crate::config::IcmpConfig;
use crate::exposition::MetricsBackend;
use crate::registry::MetricsRegistry;

static LOSS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9.]+)% packet loss").expect("loss pattern is valid"));

static RTT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"= ([0-9.]+)/([0-9.]+)/([0-9.]+)/([0-9.]+) ms").expect("rtt pattern is valid")
});

const GAUGES: [(&str, &str); 5] = [
    ("packet_loss", "Packet loss. Percent."),
    ("min_rtt", "Minimum RTT value. Nanoseconds."),
    ("avg_rtt", "Average RTT value. Nanoseconds."),
    ("max_rtt", "Maximum RTT value. Nanoseconds."),
    ("stddev_rtt", "Standard deviation of RTT value. Nanoseconds."),
];

/// Result of pinging one host
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PingStats {
    /// Percentage of echo requests without a reply
    pub packet_loss: f64,
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub max_rtt: Duration,
    pub stddev_rtt: Duration,
}

/// Sends echo requests to a host
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, host: &str) -> Result<PingStats, ScrapeError>;
}

/// Pinger backed by the system `ping` binary (iputils syntax)
pub struct SystemPinger {
    count: u32,
    size: u32,
    ttl: u32,
    deadline: Duration,
}

impl SystemPinger {
    pub fn new(config: &IcmpConfig) -> Self {
        SystemPinger {
            count: config.count,
            size: config.size,
            ttl: config.ttl,
            deadline: Duration::from_secs(config.timeout),
        }
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, host: &str) -> Result<PingStats, ScrapeError> {
        let mut command = Command::new("ping");
        command
            .arg("-n")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-s")
            .arg(self.size.to_string())
            .arg("-t")
            .arg(self.ttl.to_string())
            .arg("-w")
            .arg(self.deadline.as_secs().to_string())
            .arg(host)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // `-w` bounds the run; the outer timeout only catches a hung binary
        let output = tokio::time::timeout(self.deadline + Duration::from_secs(1), command.output())
            .await
            .map_err(|_| ScrapeError::transport(host, "ping timed out"))?
            .map_err(|e| ScrapeError::transport(host, format!("could not run ping: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_output(&stdout).ok_or_else(|| {
            let stderr = String::from_utf8_lossy(&output.stderr);
            ScrapeError::transport(host, format!("ping failed: {}", stderr.trim()))
        })
    }
}

fn millis(text: &str) -> Option<Duration> {
    let ms: f64 = text.parse().ok()?;
    ms.is_finite()
        .then(|| Duration::from_nanos((ms * 1e6).round() as u64))
}

/// Extracts loss and RTT from `ping` output
///
/// The loss line is required. The RTT line is missing when no reply came
/// back, in which case the RTTs are zero.
pub fn parse_ping_output(output: &str) -> Option<PingStats> {
    let loss = LOSS_RE.captures(output)?;
    let mut stats = PingStats {
        packet_loss: loss[1].parse().ok()?,
        ..PingStats::default()
    };

    if let Some(rtt) = RTT_RE.captures(output) {
        stats.min_rtt = millis(&rtt[1])?;
        stats.avg_rtt = millis(&rtt[2])?;
        stats.max_rtt = millis(&rtt[3])?;
        stats.stddev_rtt = millis(&rtt[4])?;
    }

    Some(stats)
}

/// ICMP scrape source
pub struct IcmpSource {
    hosts: Vec<String>,
    interval: Duration,
    pinger: Arc<dyn Pinger>,
    metrics: MetricsRegistry,
}

impl IcmpSource {
    pub fn new(config: &IcmpConfig, backend: &MetricsBackend) -> Self {
        Self::with_pinger(config, backend, Arc::new(SystemPinger::new(config)))
    }

    pub fn with_pinger(config: &IcmpConfig, backend: &MetricsBackend, pinger: Arc<dyn Pinger>) -> Self {
        IcmpSource {
            hosts: config.hosts.clone(),
            interval: Duration::from_secs(config.interval),
            pinger,
            metrics: MetricsRegistry::new(backend.clone(), "icmp", Some("host")),
        }
    }
}

#[async_trait]
impl ScrapeSource for IcmpSource {
    fn name(&self) -> &str {
        "icmp"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn setup(&mut self) -> Result<(), ScrapeError> {
        for host in &self.hosts {
            if self.metrics.has(host) {
                continue;
            }
            let set = self.metrics.get(host);
            for (name, help) in GAUGES {
                set.declare(name, help);
            }
        }
        Ok(())
    }

    async fn scrape(&mut self) -> Result<(), ScrapeError> {
        let mut first_error = None;

        for host in &self.hosts {
            let stats = match self.pinger.ping(host).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(host = %host, "Could not ping host: {}", e);
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            debug!(
                host = %host,
                "{}% loss, avg {:?}",
                stats.packet_loss, stats.avg_rtt
            );

            let set = self.metrics.get(host);
            set.set("packet_loss", stats.packet_loss);
            set.set("min_rtt", stats.min_rtt.as_nanos() as f64);
            set.set("avg_rtt", stats.avg_rtt.as_nanos() as f64);
            set.set("max_rtt", stats.max_rtt.as_nanos() as f64);
            set.set("stddev_rtt", stats.stddev_rtt.as_nanos() as f64);
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const REPLY: &str = "\
PING nas.lan (192.168.1.10) 24(52) bytes of data.
32 bytes from 192.168.1.10: icmp_seq=1 ttl=64 time=0.412 ms
32 bytes from 192.168.1.10: icmp_seq=2 ttl=64 time=0.380 ms

--- nas.lan ping statistics ---
4 packets transmitted, 3 received, 25% packet loss, time 3004ms
rtt min/avg/max/mdev = 0.380/0.500/0.750/0.125 ms
";

    const NO_REPLY: &str = "\
PING dead.lan (192.168.1.99) 24(52) bytes of data.

--- dead.lan ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3060ms
";

    #[test]
    fn test_parse_ping_output() {
        let stats = parse_ping_output(REPLY).unwrap();
        assert_eq!(stats.packet_loss, 25.0);
        assert_eq!(stats.min_rtt, Duration::from_micros(380));
        assert_eq!(stats.avg_rtt, Duration::from_micros(500));
        assert_eq!(stats.max_rtt, Duration::from_micros(750));
        assert_eq!(stats.stddev_rtt, Duration::from_micros(125));

        let dead = parse_ping_output(NO_REPLY).unwrap();
        assert_eq!(dead.packet_loss, 100.0);
        assert_eq!(dead.avg_rtt, Duration::ZERO);

        assert_eq!(parse_ping_output("ping: unknown host nope"), None);
    }

    /// Pinger answering from a fixed table; unknown hosts fail
    struct TablePinger(HashMap<&'static str, PingStats>);

    #[async_trait]
    impl Pinger for TablePinger {
        async fn ping(&self, host: &str) -> Result<PingStats, ScrapeError> {
            self.0
                .get(host)
                .copied()
                .ok_or_else(|| ScrapeError::transport(host, "unknown host"))
        }
    }

    fn config(hosts: &[&str]) -> IcmpConfig {
        IcmpConfig {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..IcmpConfig::default()
        }
    }

    #[tokio::test]
    async fn test_every_host_is_probed_and_first_error_returned() {
        let backend = MetricsBackend::new();
        let stats = PingStats {
            packet_loss: 0.0,
            min_rtt: Duration::from_micros(100),
            avg_rtt: Duration::from_micros(200),
            max_rtt: Duration::from_micros(300),
            stddev_rtt: Duration::from_micros(50),
        };
        let pinger = Arc::new(TablePinger(HashMap::from([("nas", stats)])));
        let mut source = IcmpSource::with_pinger(&config(&["gone", "nas", "also-gone"]), &backend, pinger);

        source.setup().await.unwrap();
        let err = source.scrape().await.unwrap_err();

        assert!(matches!(err, ScrapeError::Transport { ref call, .. } if call == "gone"));
        assert_eq!(backend.value("icmp_avg_rtt", &[("host", "nas")]), Some(200_000.0));
        assert_eq!(backend.value("icmp_stddev_rtt", &[("host", "nas")]), Some(50_000.0));
        // Declared in setup, never written
        assert_eq!(backend.value("icmp_packet_loss", &[("host", "gone")]), Some(0.0));
        assert_eq!(backend.count("icmp_max_rtt"), 3);
    }

    #[tokio::test]
    async fn test_no_hosts_declares_nothing() {
        let backend = MetricsBackend::new();
        let pinger = Arc::new(TablePinger(HashMap::new()));
        let mut source = IcmpSource::with_pinger(&config(&[]), &backend, pinger);

        source.setup().await.unwrap();
        source.scrape().await.unwrap();

        assert_eq!(backend.count("icmp_packet_loss"), 0);
    }
}
