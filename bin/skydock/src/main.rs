use anyhow::{anyhow, Context, Result};
use clap::Parser;
use skydock_core::{
    EventRouter, ReconciliationDriver, RegistrationEngine, RegistryMetrics, RouterExit,
    WorkloadRuntime,
};
use skydock_docker::DockerClient;
use skydock_etcd::EtcdClient;
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod metrics;

use config::{Args, LogFormat, Settings};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn wait_for_signal(mut interrupt: Signal, mut terminate: Signal) {
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting skydock...");
    let settings = Settings::from_args(args)?;
    info!(
        "Registering under {} in domain {} (ttl {}s, beat {}s)",
        settings.prefix, settings.registry_domain, settings.ttl, settings.beat
    );

    let metrics = RegistryMetrics::new()?;
    let store = Arc::new(EtcdClient::new(&settings.machines)?);
    let docker = Arc::new(DockerClient::new(settings.docker_host.clone()));
    let engine = RegistrationEngine::new(store, settings.engine_config(), metrics.clone());
    let shutdown = CancellationToken::new();

    if let Some(addr) = settings.metrics_addr {
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, metrics, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // handlers go in before the startup sweep so an early signal still
    // leads to the shutdown sweep
    let interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let signalled = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal(interrupt, terminate).await;
        info!("Got signal, exiting");
        signalled.cancel();
    });

    let driver = ReconciliationDriver::new(docker.clone(), engine.clone(), settings.naming);
    info!("Registering containers...");
    match driver.register_all().await {
        Ok(report) => info!("Registered {} containers", report.succeeded),
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => error!("Error registering existing containers: {}", e),
    }

    let exit = if shutdown.is_cancelled() {
        Ok(RouterExit::Shutdown)
    } else {
        let events = docker
            .subscribe()
            .await
            .context("Failed to attach to docker events")?;

        let router = EventRouter::new(docker.clone(), engine.clone(), settings.naming, metrics);
        let exit = router.run(events, shutdown.clone()).await;
        info!("Detached from docker events");
        exit
    };
    shutdown.cancel();

    let outcome = match exit {
        Ok(RouterExit::Shutdown) => Ok(()),
        Ok(RouterExit::StreamEnded) => Err(anyhow!("Docker event stream ended")),
        Err(e) => {
            engine.shutdown().await;
            return Err(e.into());
        }
    };

    match driver.unregister_all().await {
        Ok(report) => info!("Unregistered {} containers", report.succeeded),
        Err(e) => error!("Error unregistering containers: {}", e),
    }
    engine.shutdown().await;

    outcome
}
