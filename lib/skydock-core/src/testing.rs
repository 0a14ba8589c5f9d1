//! In-memory store and runtime used by the unit tests

use crate::runtime::{
    EventStream, RuntimeError, Workload, WorkloadEvent, WorkloadRuntime, WorkloadSummary,
};
use crate::store::{RegistryStore, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub async fn wait_until_async<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn key_not_found(key: &str) -> StoreError {
    StoreError::Rejected {
        code: 100,
        message: format!("Key not found ({})", key),
    }
}

/// Store that keeps entries in a map and can be told to fail writes
#[derive(Default)]
pub struct FakeStore {
    entries: Mutex<HashMap<String, (String, u64)>>,
    failing_keys: Mutex<HashSet<String>>,
    pub creates: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `key` fail
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Drop a key behind the engine's back, as a TTL expiry would
    pub fn expire(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for FakeStore {
    async fn create(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl));
        Ok(())
    }

    async fn refresh(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(entry) => {
                *entry = (value.to_string(), ttl);
                Ok(())
            }
            None => Err(key_not_found(key)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        match self.entries.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(key_not_found(key)),
        }
    }
}

/// Runtime with a fixed set of workloads and a scripted event stream
#[derive(Default)]
pub struct FakeRuntime {
    workloads: Mutex<Vec<Workload>>,
    broken: Mutex<HashSet<String>>,
    events: Mutex<Vec<WorkloadEvent>>,
    list_fails: Mutex<bool>,
    pub inspections: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(self, id: &str, image: &str, address: &str) -> Self {
        self.workloads.lock().unwrap().push(Workload {
            id: id.to_string(),
            image: image.to_string(),
            address: address.to_string(),
        });
        self
    }

    pub fn with_events(self, events: Vec<WorkloadEvent>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    /// Make inspection of `id` fail
    pub fn break_workload(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_listing(&self) {
        *self.list_fails.lock().unwrap() = true;
    }

    pub fn set_address(&self, id: &str, address: &str) {
        for workload in self.workloads.lock().unwrap().iter_mut() {
            if workload.id == id {
                workload.address = address.to_string();
            }
        }
    }
}

#[async_trait]
impl WorkloadRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<WorkloadSummary>, RuntimeError> {
        if *self.list_fails.lock().unwrap() {
            return Err(RuntimeError::Transport("daemon unreachable".into()));
        }
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .map(|w| WorkloadSummary {
                id: w.id.clone(),
                image: w.image.clone(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<Workload, RuntimeError> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(id) {
            return Err(RuntimeError::Api {
                status: 500,
                message: format!("cannot inspect {}", id),
            });
        }
        self.workloads
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| RuntimeError::Api {
                status: 404,
                message: format!("No such container: {}", id),
            })
    }

    async fn subscribe(&self) -> Result<EventStream, RuntimeError> {
        let events: Vec<Result<WorkloadEvent, RuntimeError>> =
            self.events.lock().unwrap().drain(..).map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
