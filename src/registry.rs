// Registry module - gauges grouped by the entity they describe
//
// Every scrape source publishes values for a set of entities (a pinged host,
// a switch, a weather location). The registry maps each entity key to the
// set of gauges declared for it, creates gauges lazily and exactly once,
// and turns writes to undeclared gauges into no-ops so that a misordered
// setup/scrape never takes the scrape loop down.
//
// A registry is owned by a single source and only touched from that
// source's own task, so it needs no locking. The gauges themselves are
// atomic and are read concurrently by the exposition endpoint.

use prometheus::Gauge;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::exposition::MetricsBackend;

/// Formats a zero-based port index as the exposed, one-based `port` label.
///
/// # Example
/// ```text
/// 0 -> "01", 9 -> "10"
/// ```
pub fn port_label(port: usize) -> String {
    format!("{:02}", port + 1)
}

/// Identity of a gauge inside one entity set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GaugeId {
    name: String,
    port: Option<usize>,
}

impl GaugeId {
    fn new(name: &str, port: Option<usize>) -> Self {
        GaugeId {
            name: name.to_string(),
            port,
        }
    }
}

/// The gauges belonging to one entity
///
/// The entity's label (e.g. `host="nas"`) is bound when the set is
/// created and attached as a constant label to every gauge it declares.
pub struct EntitySet {
    backend: MetricsBackend,
    namespace: &'static str,
    labels: Vec<(String, String)>,
    gauges: HashMap<GaugeId, Gauge>,
}

impl EntitySet {
    /// Creates an empty set
    ///
    /// # Arguments
    /// * `backend` - Where declared gauges are registered
    /// * `namespace` - Metric name prefix (`<namespace>_<name>`)
    /// * `entity` - Optional `(label name, label value)` identifying the entity
    pub fn new(
        backend: MetricsBackend,
        namespace: &'static str,
        entity: Option<(&str, &str)>,
    ) -> Self {
        let labels = entity
            .map(|(name, value)| vec![(name.to_string(), value.to_string())])
            .unwrap_or_default();

        EntitySet {
            backend,
            namespace,
            labels,
            gauges: HashMap::new(),
        }
    }

    /// Declares an entity-level gauge. Repeated declarations are ignored.
    pub fn declare(&mut self, name: &str, help: &str) {
        self.declare_inner(GaugeId::new(name, None), help);
    }

    /// Declares a per-port gauge carrying an additional `port` label.
    /// Repeated declarations are ignored.
    pub fn declare_port(&mut self, name: &str, help: &str, port: usize) {
        self.declare_inner(GaugeId::new(name, Some(port)), help);
    }

    fn declare_inner(&mut self, id: GaugeId, help: &str) {
        if self.is_declared(&id.name, id.port) {
            return;
        }

        let mut labels: HashMap<String, String> = self.labels.iter().cloned().collect();
        if let Some(port) = id.port {
            labels.insert("port".to_string(), port_label(port));
        }

        match self
            .backend
            .register_gauge(self.namespace, &id.name, help, labels)
        {
            Ok(gauge) => {
                debug!(
                    "Declared {}_{} {:?} port={:?}",
                    self.namespace, id.name, self.labels, id.port
                );
                self.gauges.insert(id, gauge);
            }
            Err(e) => {
                warn!(
                    "Could not register gauge {}_{} {:?}: {}",
                    self.namespace, id.name, self.labels, e
                );
            }
        }
    }

    /// Writes an entity-level gauge; undeclared names are ignored.
    pub fn set(&self, name: &str, value: f64) {
        if let Some(gauge) = self.gauges.get(&GaugeId::new(name, None)) {
            gauge.set(value);
        }
    }

    /// Writes a per-port gauge; undeclared name/port pairs are ignored.
    pub fn set_port(&self, name: &str, port: usize, value: f64) {
        if let Some(gauge) = self.gauges.get(&GaugeId::new(name, Some(port))) {
            gauge.set(value);
        }
    }

    /// Whether a gauge with this identity has been declared
    pub fn is_declared(&self, name: &str, port: Option<usize>) -> bool {
        self.gauges.contains_key(&GaugeId::new(name, port))
    }

    /// Number of declared gauges
    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }
}

/// Mapping from entity key to that entity's gauge set
///
/// Entries are never removed: an entity that disappears keeps its last
/// published values.
pub struct MetricsRegistry {
    backend: MetricsBackend,
    namespace: &'static str,
    entity_label: Option<&'static str>,
    entities: BTreeMap<String, EntitySet>,
}

impl MetricsRegistry {
    /// Creates an empty registry
    ///
    /// # Arguments
    /// * `backend` - Shared gauge registry
    /// * `namespace` - Metric name prefix for every gauge in this registry
    /// * `entity_label` - Label carrying the entity key (`host`, `switch`, ...),
    ///   or `None` for gauges that are not per-entity
    pub fn new(
        backend: MetricsBackend,
        namespace: &'static str,
        entity_label: Option<&'static str>,
    ) -> Self {
        MetricsRegistry {
            backend,
            namespace,
            entity_label,
            entities: BTreeMap::new(),
        }
    }

    /// Whether `key` has been seen before. Never creates anything.
    pub fn has(&self, key: &str) -> bool {
        self.entities.contains_key(key)
    }

    /// Returns the set for `key`, creating an empty one on first use.
    pub fn get(&mut self, key: &str) -> &mut EntitySet {
        let backend = &self.backend;
        let namespace = self.namespace;
        let entity_label = self.entity_label;

        self.entities.entry(key.to_string()).or_insert_with(|| {
            EntitySet::new(
                backend.clone(),
                namespace,
                entity_label.map(|label| (label, key)),
            )
        })
    }

    /// Known entity keys, in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
