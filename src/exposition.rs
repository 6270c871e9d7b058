// Exposition module - owns the gauge registry and serves it over HTTP
//
// This module is responsible for:
// 1. Holding the process-wide Prometheus registry behind a cloneable handle
// 2. Creating and registering gauges on behalf of the entity registries
// 3. Serving the union of all gauges on GET /metrics in text format

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::scheduler::wait_for_shutdown;

/// Handle on the gauge registry shared by every scrape source
///
/// Cloning is cheap: all clones refer to the same underlying registry.
/// `main` creates exactly one and passes it down; tests create their own
/// so they never observe each other's gauges.
#[derive(Clone, Default)]
pub struct MetricsBackend {
    registry: Registry,
}

impl MetricsBackend {
    /// Creates an empty registry
    pub fn new() -> Self {
        MetricsBackend {
            registry: Registry::new(),
        }
    }

    /// Creates a gauge named `<namespace>_<name>` with the given constant
    /// labels and registers it for exposition.
    ///
    /// # Errors
    /// Fails when the name or labels are not valid Prometheus identifiers,
    /// or when a gauge with the same name and label values already exists.
    pub fn register_gauge(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: HashMap<String, String>,
    ) -> Result<Gauge, prometheus::Error> {
        let opts = Opts::new(name, help)
            .namespace(namespace)
            .const_labels(labels);

        let gauge = Gauge::with_opts(opts)?;
        self.registry.register(Box::new(gauge.clone()))?;

        debug!("Registered gauge {}_{}", namespace, name);
        Ok(gauge)
    }

    /// Encodes every registered gauge in the text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Reads back the current value of one gauge (test helper)
    #[cfg(test)]
    pub fn value(&self, fq_name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == fq_name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                metric.get_label().len() == labels.len()
                    && labels.iter().all(|(name, value)| {
                        metric
                            .get_label()
                            .iter()
                            .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                    })
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Number of gauges registered under `fq_name` (test helper)
    #[cfg(test)]
    pub fn count(&self, fq_name: &str) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == fq_name)
            .map(|family| family.get_metric().len())
            .sum()
    }
}

/// Builds the HTTP router exposing `/metrics` and `/health`
pub fn router(backend: MetricsBackend) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(backend)
}

async fn metrics(State(backend): State<MetricsBackend>) -> Response {
    match backend.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "utc_time": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Binds the exposition listener on all interfaces
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Serving metrics on http://{}/metrics", listener.local_addr()?);
    Ok(listener)
}

/// Serves the exposition endpoint until `shutdown` flips to `true`
///
/// # Arguments
/// * `listener` - Bound listener from [`bind`]
/// * `backend` - Registry to expose
/// * `shutdown` - Process shutdown signal; in-flight requests are drained
pub async fn serve(
    listener: TcpListener,
    backend: MetricsBackend,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(backend))
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await?;

    info!("Metrics endpoint stopped");
    Ok(())
}
