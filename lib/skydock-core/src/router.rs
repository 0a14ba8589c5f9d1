//! Routes workload lifecycle events to the registration engine

use crate::engine::RegistrationEngine;
use crate::key::{instance_id, ServiceNaming};
use crate::metrics::RegistryMetrics;
use crate::record::ServiceRecord;
use crate::runtime::{EventKind, EventStream, WorkloadEvent, WorkloadRuntime};
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why the event loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterExit {
    /// Shutdown was requested
    Shutdown,
    /// The runtime closed the event stream
    StreamEnded,
}

pub struct EventRouter {
    runtime: Arc<dyn WorkloadRuntime>,
    engine: RegistrationEngine,
    naming: ServiceNaming,
    metrics: RegistryMetrics,
}

impl EventRouter {
    pub fn new(
        runtime: Arc<dyn WorkloadRuntime>,
        engine: RegistrationEngine,
        naming: ServiceNaming,
        metrics: RegistryMetrics,
    ) -> Self {
        Self {
            runtime,
            engine,
            naming,
            metrics,
        }
    }

    /// Consume events in arrival order until shutdown or end of stream.
    ///
    /// The stream is dropped on return, which detaches from the runtime.
    /// Only fatal errors end the loop with `Err`.
    pub async fn run(&self, mut events: EventStream, shutdown: CancellationToken) -> Result<RouterExit> {
        info!("Listening for workload events");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(RouterExit::Shutdown),
                next = events.next() => match next {
                    Some(Ok(event)) => self.route(&event).await?,
                    Some(Err(e)) => warn!(error = %e, "Failed to read workload event"),
                    None => return Ok(RouterExit::StreamEnded),
                },
            }
        }
    }

    /// Handle one event. Per-event failures are logged and the event is
    /// dropped; fatal errors are returned.
    pub async fn route(&self, event: &WorkloadEvent) -> Result<()> {
        let label = match event.kind {
            EventKind::Other(_) => "other",
            ref kind => kind.as_str(),
        };
        self.metrics.events_total.with_label_values(&[label]).inc();

        let result = match event.kind {
            EventKind::Die | EventKind::Kill | EventKind::Stop => self.deregister(&event.id).await,
            EventKind::Start | EventKind::Restart => self.register(&event.id).await,
            EventKind::Other(ref status) => {
                debug!(workload = %event.id, status = %status, "Ignoring event");
                return Ok(());
            }
        };

        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(event = %event.kind, workload = %event.id, error = %e, "Dropped workload event");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn register(&self, id: &str) -> Result<()> {
        let workload = self.runtime.inspect(id).await?;
        let service = self.naming.service_for(&workload.image)?;
        self.engine
            .add(&service, instance_id(&workload.id), ServiceRecord::with_host(workload.address))
            .await
    }

    async fn deregister(&self, id: &str) -> Result<()> {
        let workload = self.runtime.inspect(id).await?;
        let service = self.naming.service_for(&workload.image)?;
        self.engine.delete(&service, instance_id(&workload.id)).await
    }
}
