//! Engine metrics, exposed through the `metrics` command rather than an
//! HTTP scrape endpoint (§6, §9: the command channel is this engine's only
//! listener).
//!
//! Grounded on `NLnetLabs-cascade/src/metrics.rs`'s `MetricsCollection`/
//! `StateMetrics`: a `prometheus_client::registry::Registry` assembled from
//! live state on each request, plus the `StoredName`/label-family pattern
//! for per-zone breakdowns. Trimmed to what this engine tracks: zone counts
//! by [`Action`](crate::policy::Action) and task queue depth, rather than
//! the teacher's unsigned/signed/waiting/published zone-tree counts (this
//! engine moves whole zone files through external tools, not an in-memory
//! zone tree).

use std::fmt;
use std::time::Instant;

use core::sync::atomic::AtomicU64;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::{Registry, Unit};

use crate::policy::Action;

const PROMETHEUS_PREFIX: &str = "zosign";

/// A zone count, broken down by its currently pending [`Action`].
#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ActionLabel {
    action: EncodedAction,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EncodeLabelValue)]
enum EncodedAction {
    NoChange,
    NoSchedule,
    Reschedule,
    Resort,
    Reread,
    Rensec,
    Resign,
}

impl From<Action> for EncodedAction {
    fn from(action: Action) -> Self {
        match action {
            Action::NoChange => EncodedAction::NoChange,
            Action::NoSchedule => EncodedAction::NoSchedule,
            Action::Reschedule => EncodedAction::Reschedule,
            Action::Resort => EncodedAction::Resort,
            Action::Reread => EncodedAction::Reread,
            Action::Rensec => EncodedAction::Rensec,
            Action::Resign => EncodedAction::Resign,
        }
    }
}

#[derive(Debug, Default)]
struct StateMetrics {
    zones_configured: Gauge,
    zones_without_policy: Gauge,
    zones_by_action: Family<ActionLabel, Gauge>,
    queue_length: Gauge,
}

impl StateMetrics {
    fn register_metrics(&self, reg: &mut Registry) {
        reg.register(
            "zones_configured",
            "Number of zones known to the engine",
            self.zones_configured.clone(),
        );
        reg.register(
            "zones_without_policy",
            "Number of zones with no successfully-parsed policy yet",
            self.zones_without_policy.clone(),
        );
        reg.register(
            "zones_by_action",
            "Number of zones with each pending re-work action",
            self.zones_by_action.clone(),
        );
        reg.register(
            "queue_length",
            "Number of tasks currently pending in the worker queue",
            self.queue_length.clone(),
        );
    }
}

/// A snapshot of the state needed to assemble one metrics request; built by
/// [`crate::engine::Engine`] under its lock and handed to
/// [`EngineMetrics::assemble`] outside of it.
pub struct MetricsSnapshot {
    pub zones_configured: i64,
    pub zones_without_policy: i64,
    pub zone_actions: Vec<Action>,
    pub queue_length: i64,
}

/// The engine's metrics registry (§9 ambient stack).
#[derive(Debug)]
pub struct EngineMetrics {
    registry: Registry,
    assemble_time: Gauge<u64, AtomicU64>,
    state: StateMetrics,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(PROMETHEUS_PREFIX);
        let assemble_time = Gauge::default();
        let state = StateMetrics::default();

        let build_info = Info::new(vec![("version", env!("CARGO_PKG_VERSION").to_string())]);
        registry.register("build", "Engine build information", build_info);
        registry.register_with_unit(
            "metrics_assemble_duration",
            "Time taken to assemble the last metrics snapshot",
            Unit::Other("milliseconds".into()),
            assemble_time.clone(),
        );
        state.register_metrics(&mut registry);

        EngineMetrics {
            registry,
            assemble_time,
            state,
        }
    }

    /// Render the registry to OpenMetrics text, after folding in `snapshot`.
    pub fn assemble(&self, snapshot: MetricsSnapshot) -> Result<String, fmt::Error> {
        let start = Instant::now();

        self.state.zones_by_action.clear();
        self.state.zones_configured.set(snapshot.zones_configured);
        self.state
            .zones_without_policy
            .set(snapshot.zones_without_policy);
        self.state.queue_length.set(snapshot.queue_length);
        for action in snapshot.zone_actions {
            self.state
                .zones_by_action
                .get_or_create(&ActionLabel {
                    action: action.into(),
                })
                .inc();
        }

        self.assemble_time.set(start.elapsed().as_millis() as u64);

        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_renders_registered_metric_names() {
        let metrics = EngineMetrics::new();
        let text = metrics
            .assemble(MetricsSnapshot {
                zones_configured: 3,
                zones_without_policy: 1,
                zone_actions: vec![Action::Resign, Action::Resign, Action::Reread],
                queue_length: 2,
            })
            .unwrap();
        assert!(text.contains("zosign_zones_configured 3"));
        assert!(text.contains("zosign_queue_length 2"));
        assert!(text.contains("zosign_zones_by_action"));
    }
}
