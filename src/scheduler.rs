// Scheduler module - drives every scrape source on its own interval
//
// Each source runs in its own Tokio task and owns its registry, so sources
// never wait on each other. A failing or panicking scrape is logged and the
// task carries on with the next tick.
//
// # Architecture
// - `prime` runs setup and one scrape for every source before anything is
//   served; a failure there aborts start-up
// - `start` spawns one task per source, first tick one interval later
// - Shutdown is a `watch` channel checked between ticks
// - Every tick publishes `exporter_scrape_*` self-metrics for its source

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::exposition::MetricsBackend;
use crate::registry::EntitySet;
use crate::sources::{ScrapeError, ScrapeSource};

/// Fatal errors raised while bringing sources up
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("setup of source '{name}' failed: {source}")]
    Setup {
        name: String,
        #[source]
        source: ScrapeError,
    },

    #[error("initial scrape of source '{name}' failed: {source}")]
    InitialScrape {
        name: String,
        #[source]
        source: ScrapeError,
    },
}

/// How a single tick ended
#[derive(Debug)]
enum TickOutcome {
    Ok,
    Failed(ScrapeError),
    Panicked(String),
}

/// A source plus the gauges describing its scrapes
struct Entry {
    source: Box<dyn ScrapeSource>,
    status: EntitySet,
}

/// Periodic driver for all scrape sources
pub struct MetricScheduler {
    backend: MetricsBackend,
    shutdown: watch::Receiver<bool>,
    entries: Vec<Entry>,
}

impl MetricScheduler {
    /// Creates an empty scheduler
    ///
    /// # Arguments
    /// * `backend` - Where the per-source self-metrics are registered
    /// * `shutdown` - Flips to `true` when the process is stopping
    pub fn new(backend: MetricsBackend, shutdown: watch::Receiver<bool>) -> Self {
        MetricScheduler {
            backend,
            shutdown,
            entries: Vec::new(),
        }
    }

    /// Adds a source and declares its self-metrics
    pub fn add(&mut self, source: Box<dyn ScrapeSource>) {
        let mut status = EntitySet::new(
            self.backend.clone(),
            "exporter",
            Some(("exporter", source.name())),
        );
        status.declare("scrape_success", "Did the last scrape succeed?");
        status.declare("scrape_duration_seconds", "Duration of the last scrape.");
        status.declare(
            "last_scrape_timestamp_seconds",
            "Unix time at which the last scrape finished.",
        );

        self.entries.push(Entry { source, status });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `setup` and one initial scrape for every source, in order
    ///
    /// # Errors
    /// The first setup or scrape failure, naming the source. Start-up
    /// treats it as fatal misconfiguration.
    pub async fn prime(&mut self) -> Result<(), StartupError> {
        for entry in &mut self.entries {
            let name = entry.source.name().to_string();

            info!("Setting up source '{}'", name);
            entry
                .source
                .setup()
                .await
                .map_err(|source| StartupError::Setup {
                    name: name.clone(),
                    source,
                })?;

            match run_tick(entry).await {
                TickOutcome::Ok => info!("Initial scrape of '{}' succeeded", name),
                TickOutcome::Failed(source) => {
                    return Err(StartupError::InitialScrape { name, source });
                }
                TickOutcome::Panicked(reason) => {
                    return Err(StartupError::InitialScrape {
                        name,
                        source: ScrapeError::transport("scrape", format!("panicked: {reason}")),
                    });
                }
            }
        }

        Ok(())
    }

    /// Spawns one task per source and waits until all of them have stopped
    ///
    /// Tasks stop between ticks once the shutdown signal is raised; an
    /// in-flight scrape always runs to completion.
    pub async fn start(self) {
        let mut handles = Vec::new();

        for entry in self.entries {
            let shutdown = self.shutdown.clone();
            let name = entry.source.name().to_string();

            info!(
                "Scheduling source '{}' every {}s",
                name,
                entry.source.interval().as_secs()
            );

            handles.push((name, tokio::spawn(run_source(entry, shutdown))));
        }

        info!("Started {} scrape task(s)", handles.len());

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!("Scrape task for '{}' ended abnormally: {}", name, e);
            }
        }

        info!("All scrape tasks stopped");
    }
}

/// Waits until the shutdown flag is `true` or every sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Scrape loop of one source
async fn run_source(mut entry: Entry, mut shutdown: watch::Receiver<bool>) {
    // tokio rejects a zero period
    let mut period = entry.source.interval();
    if period.is_zero() {
        period = Duration::from_secs(1);
    }
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }

        match run_tick(&mut entry).await {
            TickOutcome::Ok => {}
            TickOutcome::Failed(e) => {
                warn!(source = entry.source.name(), "Scrape error: {}", e);
            }
            TickOutcome::Panicked(reason) => {
                error!(source = entry.source.name(), "Scrape panicked: {}", reason);
            }
        }
    }

    debug!("Scrape loop of '{}' stopped", entry.source.name());
}

/// Runs one scrape, isolating panics, and records its outcome
async fn run_tick(entry: &mut Entry) -> TickOutcome {
    let started = Instant::now();

    let outcome = match AssertUnwindSafe(entry.source.scrape()).catch_unwind().await {
        Ok(Ok(())) => TickOutcome::Ok,
        Ok(Err(e)) => TickOutcome::Failed(e),
        Err(panic) => TickOutcome::Panicked(panic_message(panic.as_ref())),
    };

    let success = matches!(outcome, TickOutcome::Ok);
    entry
        .status
        .set("scrape_success", if success { 1.0 } else { 0.0 });
    entry
        .status
        .set("scrape_duration_seconds", started.elapsed().as_secs_f64());
    entry.status.set(
        "last_scrape_timestamp_seconds",
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
    );

    outcome
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
