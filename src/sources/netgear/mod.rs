// Netgear source - per-port switch statistics via NSDP discovery
//
// Switches are not configured; they are discovered by a broadcast query on
// every scrape. A switch's gauges are declared the first time it answers
// and are never removed. A switch that stops answering is reported with
// `up` = 0 and keeps its last counters.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ScrapeError, ScrapeSource};
use crate::config::NetgearConfig;
use crate::exposition::MetricsBackend;
use crate::nsdp::{DiscoveryClient, NsdpClient, Tag};
use crate::registry::MetricsRegistry;

pub mod aggregate;

use aggregate::{fold, group, host_names, DeviceRecord};

/// Records requested on every scrape
const QUERY_TAGS: [Tag; 4] = [
    Tag::HostName,
    Tag::HostIp,
    Tag::PortLinkStatus,
    Tag::PortStatistics,
];

const PORT_COUNTERS: [(&str, &str); 6] = [
    ("rx_total_bytes", "Total bytes received for a port."),
    ("tx_total_bytes", "Total bytes transmitted for a port."),
    ("packets", "Total packets on this port."),
    ("packets_bcast", "Total broadcast packets on this port."),
    ("packets_mcast", "Total multicast packets on this port."),
    ("crc_errors", "Total CRC errors on this port."),
];

/// Netgear switch scrape source
pub struct NetgearSource {
    interval: Duration,
    client: Box<dyn DiscoveryClient>,
    switches: MetricsRegistry,
}

impl NetgearSource {
    /// Binds the discovery socket and builds the source
    ///
    /// # Errors
    /// `Transport` when the socket cannot be set up.
    pub async fn connect(config: &NetgearConfig, backend: &MetricsBackend) -> Result<Self, ScrapeError> {
        let client = NsdpClient::bind(config)
            .await
            .map_err(|e| ScrapeError::transport("nsdp bind", e))?;

        Ok(Self::with_client(config, backend, Box::new(client)))
    }

    /// Builds the source around an existing discovery client
    pub fn with_client(
        config: &NetgearConfig,
        backend: &MetricsBackend,
        client: Box<dyn DiscoveryClient>,
    ) -> Self {
        NetgearSource {
            interval: Duration::from_secs(config.interval),
            client,
            switches: MetricsRegistry::new(backend.clone(), "netgear", Some("switch")),
        }
    }

    /// Writes one device's values, declaring its gauges on first sighting
    fn publish(&mut self, device: &DeviceRecord) {
        let first_sighting = !self.switches.has(&device.name);
        let set = self.switches.get(&device.name);

        if first_sighting {
            info!(
                switch = %device.name,
                "Discovered switch at {} with {} ports",
                device
                    .address
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown address".to_string()),
                device.link_status.len().max(device.statistics.len())
            );
            set.declare("up", "Is the given switch online?");
        }

        for (port, status) in device.link_status.iter().enumerate() {
            if first_sighting {
                set.declare_port("speed", "Port speed.", port);
            }
            debug!(
                switch = %device.name,
                "Port {}: speed code {}, flags {:#04x}",
                port + 1,
                status.speed,
                status.flags
            );
            set.set_port("speed", port, f64::from(status.speed));
        }

        for (port, counters) in device.statistics.iter().enumerate() {
            if first_sighting {
                for (name, help) in PORT_COUNTERS {
                    set.declare_port(name, help, port);
                }
            }

            set.set_port("rx_total_bytes", port, counters.received as f64);
            set.set_port("tx_total_bytes", port, counters.sent as f64);
            set.set_port("packets", port, counters.packets as f64);
            set.set_port("packets_bcast", port, counters.broadcast as f64);
            set.set_port("packets_mcast", port, counters.multicast as f64);
            set.set_port("crc_errors", port, counters.errors as f64);
        }
    }

    /// Marks every known switch up or down depending on whether it answered
    fn liveness(&mut self, answered: &[&str]) {
        if self.switches.is_empty() {
            return;
        }

        for key in self.switches.keys() {
            let up = answered.contains(&key.as_str());
            self.switches.get(&key).set("up", if up { 1.0 } else { 0.0 });
        }
    }
}

#[async_trait]
impl ScrapeSource for NetgearSource {
    fn name(&self) -> &str {
        "netgear"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn scrape(&mut self) -> Result<(), ScrapeError> {
        let records = self
            .client
            .query(&QUERY_TAGS)
            .await
            .map_err(|e| ScrapeError::transport("nsdp read", e))?;

        if records.is_empty() {
            self.liveness(&[]);
            return Err(ScrapeError::transport("nsdp read", "no switch answered"));
        }

        let grouped = group(records);
        let names = host_names(&grouped);
        if names.len() > 1 {
            // TODO: group by responding device before grouping by tag so
            // that multi-switch segments get per-switch port records
            warn!(
                "{} switches answered one query ({}); attributing ports to '{}'",
                names.len(),
                names.join(", "),
                names[0]
            );
        }

        match fold(&grouped) {
            Ok(device) => {
                self.publish(&device);
                debug!("{} switch(es) known", self.switches.len());
            }
            Err(e) => warn!("Ignoring discovery response: {}", e),
        }

        self.liveness(&names);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nsdp::{LinkStatus, NsdpError, PortCounters, RawRecord};
    use std::collections::VecDeque;

    /// Discovery client replaying one scripted response per query
    struct ScriptedDiscovery {
        responses: VecDeque<Result<Vec<RawRecord>, NsdpError>>,
    }

    impl ScriptedDiscovery {
        fn new(responses: Vec<Result<Vec<RawRecord>, NsdpError>>) -> Box<Self> {
            Box::new(ScriptedDiscovery {
                responses: responses.into(),
            })
        }
    }

    #[async_trait]
    impl DiscoveryClient for ScriptedDiscovery {
        async fn query(&mut self, _tags: &[Tag]) -> Result<Vec<RawRecord>, NsdpError> {
            self.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn counters(received: u64) -> RawRecord {
        RawRecord::PortStatistics(PortCounters {
            received,
            sent: received * 2,
            packets: 10,
            broadcast: 1,
            multicast: 2,
            errors: 3,
        })
    }

    fn switch(name: &str, received: u64) -> Vec<RawRecord> {
        vec![
            RawRecord::HostName(name.to_string()),
            RawRecord::PortLinkStatus(LinkStatus { speed: 5, flags: 1 }),
            RawRecord::PortLinkStatus(LinkStatus { speed: 0, flags: 0 }),
            counters(received),
            counters(received + 1),
        ]
    }

    fn port_value(backend: &MetricsBackend, name: &str, port: &str) -> Option<f64> {
        backend.value(
            &format!("netgear_{name}"),
            &[("switch", "sw1"), ("port", port)],
        )
    }

    fn up(backend: &MetricsBackend, name: &str) -> Option<f64> {
        backend.value("netgear_up", &[("switch", name)])
    }

    fn source(backend: &MetricsBackend, script: Box<ScriptedDiscovery>) -> NetgearSource {
        NetgearSource::with_client(&NetgearConfig::default(), backend, script)
    }

    #[tokio::test]
    async fn test_first_sighting_declares_and_publishes() {
        let backend = MetricsBackend::new();
        let mut netgear = source(&backend, ScriptedDiscovery::new(vec![Ok(switch("sw1", 100))]));

        netgear.scrape().await.unwrap();

        assert_eq!(up(&backend, "sw1"), Some(1.0));
        assert_eq!(port_value(&backend, "speed", "01"), Some(5.0));
        assert_eq!(port_value(&backend, "speed", "02"), Some(0.0));
        assert_eq!(port_value(&backend, "rx_total_bytes", "01"), Some(100.0));
        assert_eq!(port_value(&backend, "tx_total_bytes", "02"), Some(202.0));
        assert_eq!(port_value(&backend, "crc_errors", "01"), Some(3.0));
        assert_eq!(backend.count("netgear_packets_mcast"), 2);
    }

    #[tokio::test]
    async fn test_silent_switch_goes_down_and_keeps_counters() {
        let backend = MetricsBackend::new();
        let mut netgear = source(
            &backend,
            ScriptedDiscovery::new(vec![
                Ok(switch("sw1", 100)),
                Ok(switch("sw2", 500)),
                Ok(Vec::new()),
            ]),
        );

        netgear.scrape().await.unwrap();
        netgear.scrape().await.unwrap();

        assert_eq!(up(&backend, "sw1"), Some(0.0));
        assert_eq!(up(&backend, "sw2"), Some(1.0));
        assert_eq!(port_value(&backend, "rx_total_bytes", "01"), Some(100.0));

        // Nobody answers at all
        let err = netgear.scrape().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Transport { .. }));
        assert_eq!(up(&backend, "sw2"), Some(0.0));
    }

    #[tokio::test]
    async fn test_known_switch_updates_values_only() {
        let backend = MetricsBackend::new();
        let mut netgear = source(
            &backend,
            ScriptedDiscovery::new(vec![Ok(switch("sw1", 100)), Ok(switch("sw1", 150))]),
        );

        netgear.scrape().await.unwrap();
        netgear.scrape().await.unwrap();

        assert_eq!(port_value(&backend, "rx_total_bytes", "01"), Some(150.0));
        assert_eq!(backend.count("netgear_rx_total_bytes"), 2);
        assert_eq!(backend.count("netgear_up"), 1);
    }

    #[tokio::test]
    async fn test_nameless_response_is_skipped() {
        let backend = MetricsBackend::new();
        let mut nameless = switch("", 100);
        nameless.push(RawRecord::HostIp("10.0.0.9".parse().unwrap()));
        let mut netgear = source(
            &backend,
            ScriptedDiscovery::new(vec![Ok(switch("sw1", 100)), Ok(nameless)]),
        );

        netgear.scrape().await.unwrap();
        netgear.scrape().await.unwrap();

        assert_eq!(up(&backend, "sw1"), Some(0.0));
        assert_eq!(netgear.switches.len(), 1);
    }

    #[tokio::test]
    async fn test_socket_failure_is_transport_error() {
        let backend = MetricsBackend::new();
        let failure = std::io::Error::other("network unreachable");
        let mut netgear = source(&backend, ScriptedDiscovery::new(vec![Err(NsdpError::Io(failure))]));

        let err = netgear.scrape().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Transport { ref call, .. } if call == "nsdp read"));
    }
}
