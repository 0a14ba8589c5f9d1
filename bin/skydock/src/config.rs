//! Command line and environment configuration

use clap::{Parser, ValueEnum};
use skydock_core::{EngineConfig, RuntimeError, ServiceNaming};
use skydock_docker::host::{DockerHost, DEFAULT_DOCKER_HOST};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_PREFIX: &str = "/skydns";
pub const DEFAULT_DOMAIN: &str = "skydns.local";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_TTL: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no etcd endpoints given; set SKYDOCK_MACHINES=http://127.0.0.1:2379")]
    NoMachines,

    #[error("invalid SKYDOCK_TTL: must be greater than zero")]
    InvalidTtl,

    #[error("invalid SKYDOCK_BEAT: must be greater than zero")]
    InvalidBeat,

    #[error("invalid DOCKER_HOST: {0}")]
    DockerHost(#[from] RuntimeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "skydock", version, about = "Registers running containers with SkyDNS")]
pub struct Args {
    /// etcd machine URLs, comma separated
    #[arg(long, env = "SKYDOCK_MACHINES", value_delimiter = ',')]
    pub machines: Vec<String>,

    /// etcd keyspace prefix
    #[arg(long, env = "SKYDOCK_PREFIX")]
    pub prefix: Option<String>,

    /// SkyDNS domain
    #[arg(long, env = "SKYDOCK_DOMAIN")]
    pub domain: Option<String>,

    /// Environment label prepended to the domain
    #[arg(long, env = "SKYDOCK_ENV")]
    pub environment: Option<String>,

    /// Key TTL in seconds
    #[arg(long, env = "SKYDOCK_TTL")]
    pub ttl: Option<u64>,

    /// Heartbeat interval in seconds
    #[arg(long, env = "SKYDOCK_BEAT")]
    pub beat: Option<u64>,

    /// Keep the image owner in service names (`mischief/foo` -> `mischief-foo`)
    #[arg(long, env = "SKYDOCK_QUALIFY_OWNER")]
    pub qualify_owner: bool,

    #[arg(long, env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
    pub docker_host: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "SKYDOCK_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "SKYDOCK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Resolved daemon settings
#[derive(Clone, Debug)]
pub struct Settings {
    pub machines: Vec<String>,
    pub prefix: String,
    /// `<environment>.<domain>`
    pub registry_domain: String,
    pub ttl: u64,
    pub beat: u64,
    pub naming: ServiceNaming,
    pub docker_host: DockerHost,
    pub metrics_addr: Option<SocketAddr>,
}

fn or_default(value: Option<String>, default: &str, name: &str) -> String {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => v,
        None => {
            warn!("using default {}={}", name, default);
            default.to_string()
        }
    }
}

impl Settings {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let machines: Vec<String> = args
            .machines
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if machines.is_empty() {
            return Err(ConfigError::NoMachines);
        }

        let prefix = or_default(args.prefix, DEFAULT_PREFIX, "SKYDOCK_PREFIX");
        let domain = or_default(args.domain, DEFAULT_DOMAIN, "SKYDOCK_DOMAIN");
        let environment = or_default(args.environment, DEFAULT_ENVIRONMENT, "SKYDOCK_ENV");

        let ttl = match args.ttl {
            Some(0) => return Err(ConfigError::InvalidTtl),
            Some(ttl) => ttl,
            None => {
                warn!("using default SKYDOCK_TTL={}", DEFAULT_TTL);
                DEFAULT_TTL
            }
        };

        let beat = match args.beat {
            Some(0) => return Err(ConfigError::InvalidBeat),
            Some(beat) => beat,
            None => {
                let beat = ttl - ttl / 4;
                warn!("using default SKYDOCK_BEAT={}", beat);
                beat
            }
        };
        if beat >= ttl {
            warn!("SKYDOCK_BEAT={} is not shorter than SKYDOCK_TTL={}; keys may expire between beats", beat, ttl);
        }

        Ok(Self {
            machines,
            prefix,
            registry_domain: format!("{}.{}", environment, domain),
            ttl,
            beat,
            naming: ServiceNaming::new(args.qualify_owner),
            docker_host: DockerHost::parse(&args.docker_host)?,
            metrics_addr: args.metrics_addr,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            prefix: self.prefix.clone(),
            domain: self.registry_domain.clone(),
            ttl: self.ttl,
            beat: Duration::from_secs(self.beat),
        }
    }
}
