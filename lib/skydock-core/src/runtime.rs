//! Workload runtime boundary (container enumeration, inspection and events)

use crate::store::BoxError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Runtime unreachable: {0}")]
    Transport(#[source] BoxError),

    #[error("Runtime API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid runtime response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid runtime endpoint: {0}")]
    InvalidEndpoint(String),
}

/// A running workload as returned by enumeration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub id: String,
    pub image: String,
}

/// Inspected workload state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub id: String,
    pub image: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Restart,
    Die,
    Kill,
    Stop,
    Other(String),
}

impl EventKind {
    pub fn parse(status: &str) -> Self {
        match status {
            "start" => EventKind::Start,
            "restart" => EventKind::Restart,
            "die" => EventKind::Die,
            "kill" => EventKind::Kill,
            "stop" => EventKind::Stop,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Start => "start",
            EventKind::Restart => "restart",
            EventKind::Die => "die",
            EventKind::Kill => "kill",
            EventKind::Stop => "stop",
            EventKind::Other(other) => other,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle transition of one workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadEvent {
    pub kind: EventKind,
    pub id: String,
}

impl WorkloadEvent {
    pub fn new(kind: EventKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// Event subscription; dropping it detaches from the runtime
pub type EventStream = BoxStream<'static, Result<WorkloadEvent, RuntimeError>>;

#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Currently running workloads
    async fn list_running(&self) -> Result<Vec<WorkloadSummary>, RuntimeError>;

    /// Current state of one workload, read fresh on every call
    async fn inspect(&self, id: &str) -> Result<Workload, RuntimeError>;

    /// Attach to the lifecycle event stream
    async fn subscribe(&self) -> Result<EventStream, RuntimeError>;
}
