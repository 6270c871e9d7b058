// DNS source - resolution time per configured name

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ScrapeError, ScrapeSource};
use crate::config::DnsConfig;
use crate::exposition::MetricsBackend;
use crate::registry::MetricsRegistry;

/// Resolves host names to addresses
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ScrapeError>;
}

/// Resolver using the system resolver through tokio
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        SystemResolver { timeout }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ScrapeError> {
        let addrs = tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, 0)))
            .await
            .map_err(|_| ScrapeError::transport(host, "lookup timed out"))?
            .map_err(|e| ScrapeError::transport(host, e))?;

        let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
        if ips.is_empty() {
            return Err(ScrapeError::transport(host, "no addresses"));
        }

        Ok(ips)
    }
}

/// DNS scrape source
pub struct DnsSource {
    hosts: Vec<String>,
    interval: Duration,
    resolver: Arc<dyn Resolver>,
    metrics: MetricsRegistry,
}

impl DnsSource {
    pub fn new(config: &DnsConfig, backend: &MetricsBackend) -> Self {
        let resolver = SystemResolver::new(Duration::from_secs(config.timeout));
        Self::with_resolver(config, backend, Arc::new(resolver))
    }

    pub fn with_resolver(config: &DnsConfig, backend: &MetricsBackend, resolver: Arc<dyn Resolver>) -> Self {
        DnsSource {
            hosts: config.hosts.clone(),
            interval: Duration::from_secs(config.interval),
            resolver,
            metrics: MetricsRegistry::new(backend.clone(), "dns", Some("host")),
        }
    }
}

#[async_trait]
impl ScrapeSource for DnsSource {
    fn name(&self) -> &str {
        "dns"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn setup(&mut self) -> Result<(), ScrapeError> {
        for host in &self.hosts {
            let set = self.metrics.get(host);
            set.declare("response_time", "DNS query response time. Nanoseconds.");
            set.declare("resolved", "Did the last lookup succeed?");
        }
        Ok(())
    }

    async fn scrape(&mut self) -> Result<(), ScrapeError> {
        let mut first_error = None;

        for host in &self.hosts {
            let started = Instant::now();
            let result = self.resolver.resolve(host).await;
            let elapsed = started.elapsed();

            let set = self.metrics.get(host);
            match result {
                Ok(ips) => {
                    debug!(host = %host, "Resolved to {:?} in {:?}", ips, elapsed);
                    set.set("response_time", elapsed.as_nanos() as f64);
                    set.set("resolved", 1.0);
                }
                Err(e) => {
                    warn!(host = %host, "Could not resolve host: {}", e);
                    set.set("resolved", 0.0);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
