//! Docker Engine API integration: container enumeration, inspection and events
pub mod client;
pub mod events;
pub mod host;

pub use client::DockerClient;
pub use host::DockerHost;
