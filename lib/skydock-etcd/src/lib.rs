//! etcd store backend for the registration engine
pub mod client;

pub use client::EtcdClient;
