//! Registration engine: add, refresh and remove instances in the registry

use crate::heartbeat::HeartbeatSupervisor;
use crate::key::KeyDeriver;
use crate::metrics::RegistryMetrics;
use crate::record::ServiceRecord;
use crate::store::RegistryStore;
use crate::{CoreError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings shared by every registration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Key prefix, e.g. `/skydns`
    pub prefix: String,
    /// Registry domain including the environment label, e.g. `dev.skydns.local`
    pub domain: String,
    /// Store TTL in seconds
    pub ttl: u64,
    /// Delay between TTL refreshes
    pub beat: Duration,
}

struct EngineInner {
    store: Arc<dyn RegistryStore>,
    keys: KeyDeriver,
    ttl: u64,
    beat: Duration,
    heartbeats: HeartbeatSupervisor,
    metrics: RegistryMetrics,
}

/// RegistrationEngine mirrors instances into the registry and keeps their
/// keys alive until they are deleted or a refresh fails
#[derive(Clone)]
pub struct RegistrationEngine {
    inner: Arc<EngineInner>,
}

impl RegistrationEngine {
    pub fn new(store: Arc<dyn RegistryStore>, config: EngineConfig, metrics: RegistryMetrics) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                keys: KeyDeriver::new(config.prefix, config.domain),
                ttl: config.ttl,
                beat: config.beat,
                heartbeats: HeartbeatSupervisor::new(metrics.clone()),
                metrics,
            }),
        }
    }

    pub fn key(&self, service: &str, instance: &str) -> String {
        self.inner.keys.key(service, instance)
    }

    pub fn heartbeats(&self) -> &HeartbeatSupervisor {
        &self.inner.heartbeats
    }

    /// Write the instance record and start renewing it.
    ///
    /// Returns once the store write completes; the renewal task runs in the
    /// background. A failed write leaves no renewal behind.
    pub async fn add(&self, service: &str, instance: &str, record: ServiceRecord) -> Result<()> {
        let value = record.to_json()?;
        let key = self.key(service, instance);

        let result = self.inner.store.create(&key, &value, self.inner.ttl).await;
        RegistryMetrics::record(&self.inner.metrics.registrations_total, result.is_ok());
        result.map_err(|e| CoreError::store("create", &key, e))?;

        info!(key = %key, service, instance, "Registered instance");

        let engine = self.clone();
        let service = service.to_string();
        let instance = instance.to_string();
        let started = self
            .inner
            .heartbeats
            .start(key.clone(), record, self.inner.beat, move |record| {
                let engine = engine.clone();
                let service = service.clone();
                let instance = instance.clone();
                async move { engine.update(&service, &instance, &record).await }
            })
            .await;

        if !started {
            debug!(key = %key, "Instance already renewed, record replaced");
        }
        Ok(())
    }

    /// Rewrite an existing instance record and reset its TTL
    pub async fn update(&self, service: &str, instance: &str, record: &ServiceRecord) -> Result<()> {
        let value = record.to_json()?;
        let key = self.key(service, instance);

        self.inner
            .store
            .refresh(&key, &value, self.inner.ttl)
            .await
            .map_err(|e| CoreError::store("refresh", &key, e))?;

        debug!(key = %key, "Refreshed instance");
        Ok(())
    }

    /// Remove the instance record and stop renewing it.
    ///
    /// The renewal task is cancelled even when the store delete fails, so a
    /// stuck key still expires once its TTL runs out.
    pub async fn delete(&self, service: &str, instance: &str) -> Result<()> {
        let key = self.key(service, instance);

        let result = self.inner.store.delete(&key).await;
        RegistryMetrics::record(&self.inner.metrics.deregistrations_total, result.is_ok());
        self.inner.heartbeats.stop(&key).await;

        match result {
            Ok(()) => {
                info!(key = %key, service, instance, "Deregistered instance");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Store delete failed");
                Err(CoreError::store("delete", &key, e))
            }
        }
    }

    /// Cancel every renewal task
    pub async fn shutdown(&self) -> usize {
        self.inner.heartbeats.stop_all().await
    }
}
