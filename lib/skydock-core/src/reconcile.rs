//! Startup and shutdown reconciliation sweeps

use crate::engine::RegistrationEngine;
use crate::key::{instance_id, ServiceNaming};
use crate::record::ServiceRecord;
use crate::runtime::WorkloadRuntime;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one sweep over the running workloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// ReconciliationDriver registers every running workload at startup and
/// deregisters them again at shutdown
pub struct ReconciliationDriver {
    runtime: Arc<dyn WorkloadRuntime>,
    engine: RegistrationEngine,
    naming: ServiceNaming,
}

impl ReconciliationDriver {
    pub fn new(runtime: Arc<dyn WorkloadRuntime>, engine: RegistrationEngine, naming: ServiceNaming) -> Self {
        Self {
            runtime,
            engine,
            naming,
        }
    }

    /// Register all running workloads.
    ///
    /// A failure on one workload is logged and counted; only enumeration
    /// failures and naming violations end the sweep early.
    pub async fn register_all(&self) -> Result<SweepReport> {
        let workloads = self.runtime.list_running().await?;
        debug!("Found {} running workloads", workloads.len());

        let mut report = SweepReport::default();
        for summary in workloads {
            let workload = match self.runtime.inspect(&summary.id).await {
                Ok(workload) => workload,
                Err(e) => {
                    error!(workload = %summary.id, error = %e, "Failed to inspect workload");
                    report.failed += 1;
                    continue;
                }
            };

            let service = self.naming.service_for(&workload.image)?;
            let instance = instance_id(&workload.id);
            match self
                .engine
                .add(&service, instance, ServiceRecord::with_host(workload.address))
                .await
            {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    error!(workload = %summary.id, error = %e, "Failed to register workload");
                    report.failed += 1;
                }
            }
        }

        info!("Registered {} workloads ({} failed)", report.succeeded, report.failed);
        Ok(report)
    }

    /// Deregister all running workloads, as listed by the runtime.
    ///
    /// Unlike startup, a naming violation here is logged and counted so the
    /// remaining workloads are still deregistered.
    pub async fn unregister_all(&self) -> Result<SweepReport> {
        let workloads = self.runtime.list_running().await?;

        let mut report = SweepReport::default();
        for summary in workloads {
            let service = match self.naming.service_for(&summary.image) {
                Ok(service) => service,
                Err(e) => {
                    error!(workload = %summary.id, error = %e, "Cannot name workload for deregistration");
                    report.failed += 1;
                    continue;
                }
            };
            match self.engine.delete(&service, instance_id(&summary.id)).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    error!(workload = %summary.id, error = %e, "Failed to deregister workload");
                    report.failed += 1;
                }
            }
        }

        info!("Unregistered {} workloads ({} failed)", report.succeeded, report.failed);
        Ok(report)
    }
}
