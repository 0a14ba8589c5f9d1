//! Core registration and heartbeat engine
//!
//! This library provides:
//! - Registry key and service name derivation
//! - Store and workload-runtime boundaries as traits
//! - Heartbeat supervision with at-most-one renewal task per key
//! - Registration engine, startup/shutdown reconciliation and event routing

pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod key;
pub mod metrics;
pub mod reconcile;
pub mod record;
pub mod router;
pub mod runtime;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineConfig, RegistrationEngine};
pub use error::{CoreError, Result};
pub use heartbeat::HeartbeatSupervisor;
pub use key::{derive_key, image_to_service, instance_id, KeyDeriver, NamingError, ServiceNaming};
pub use metrics::RegistryMetrics;
pub use reconcile::{ReconciliationDriver, SweepReport};
pub use record::ServiceRecord;
pub use router::{EventRouter, RouterExit};
pub use runtime::{EventKind, EventStream, RuntimeError, Workload, WorkloadEvent, WorkloadRuntime, WorkloadSummary};
pub use store::{RegistryStore, StoreError};
