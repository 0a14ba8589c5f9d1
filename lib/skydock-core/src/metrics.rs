//! Prometheus metrics for registrations and heartbeats

use anyhow::Result;
use prometheus::{CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Registry metrics shared by the engine, the heartbeat tasks and the router
#[derive(Clone)]
pub struct RegistryMetrics {
    /// Store creates by result
    pub registrations_total: CounterVec,
    /// Store deletes by result
    pub deregistrations_total: CounterVec,
    /// TTL refreshes by result
    pub heartbeats_total: CounterVec,
    /// Renewal tasks currently running
    pub active_heartbeats: IntGauge,
    /// Lifecycle events received, by kind
    pub events_total: CounterVec,
    pub registry: Arc<Registry>,
}

impl RegistryMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let registrations_total = CounterVec::new(
            Opts::new("skydock_registrations_total", "Registry creates by result"),
            &["result"],
        )?;

        let deregistrations_total = CounterVec::new(
            Opts::new("skydock_deregistrations_total", "Registry deletes by result"),
            &["result"],
        )?;

        let heartbeats_total = CounterVec::new(
            Opts::new("skydock_heartbeats_total", "TTL refreshes by result"),
            &["result"],
        )?;

        let active_heartbeats = IntGauge::new(
            "skydock_active_heartbeats",
            "Renewal tasks currently running",
        )?;

        let events_total = CounterVec::new(
            Opts::new("skydock_events_total", "Workload lifecycle events by kind"),
            &["kind"],
        )?;

        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(deregistrations_total.clone()))?;
        registry.register(Box::new(heartbeats_total.clone()))?;
        registry.register(Box::new(active_heartbeats.clone()))?;
        registry.register(Box::new(events_total.clone()))?;

        Ok(Self {
            registrations_total,
            deregistrations_total,
            heartbeats_total,
            active_heartbeats,
            events_total,
            registry,
        })
    }

    pub(crate) fn record(counter: &CounterVec, ok: bool) {
        let result = if ok { "success" } else { "failure" };
        counter.with_label_values(&[result]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default RegistryMetrics")
    }
}
