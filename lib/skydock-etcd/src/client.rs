//! etcd v2 keys API client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use skydock_core::{RegistryStore, StoreError};
use std::time::Duration;
use tracing::debug;

/// Error body returned by etcd, e.g.
/// `{"errorCode":100,"message":"Key not found","cause":"/skydns/x","index":7}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u64,
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

/// EtcdClient writes registry keys through the etcd v2 HTTP API.
///
/// Machines are tried in the order given; a machine that cannot be reached
/// is skipped, while an error response from a reachable machine is final.
pub struct EtcdClient {
    http: Client,
    machines: Vec<Url>,
}

impl EtcdClient {
    /// Create a client for the given machine URLs, e.g. `http://127.0.0.1:2379`
    pub fn new(machines: &[String]) -> Result<Self, StoreError> {
        let machines = machines
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|m| Url::parse(m).map_err(|e| StoreError::Unavailable(Box::new(e))))
            .collect::<Result<Vec<_>, _>>()?;

        if machines.is_empty() {
            return Err(StoreError::NoEndpoints);
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;

        Ok(Self { http, machines })
    }

    fn key_url(machine: &Url, key: &str) -> Url {
        let mut url = machine.clone();
        url.set_path(&format!("/v2/keys/{}", key.trim_start_matches('/')));
        url
    }

    async fn send<F>(&self, key: &str, build: F) -> Result<(), StoreError>
    where
        F: Fn(&Client, Url) -> RequestBuilder,
    {
        let mut last_error = None;
        for machine in &self.machines {
            match build(&self.http, Self::key_url(machine, key)).send().await {
                Ok(response) => return Self::check(response).await,
                Err(e) => {
                    debug!(machine = %machine, error = %e, "etcd machine unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => StoreError::Unavailable(Box::new(e)),
            None => StoreError::NoEndpoints,
        })
    }

    async fn check(response: Response) -> Result<(), StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<EtcdErrorBody>(&body) {
            Ok(err) => StoreError::Rejected {
                code: err.error_code,
                message: match err.cause {
                    Some(cause) => format!("{}: {}", err.message, cause),
                    None => err.message,
                },
            },
            Err(_) => StoreError::Rejected {
                code: u64::from(status.as_u16()),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            },
        })
    }
}

#[async_trait]
impl RegistryStore for EtcdClient {
    async fn create(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError> {
        let ttl = ttl.to_string();
        self.send(key, |http, url| {
            http.put(url).form(&[("value", value), ("ttl", ttl.as_str())])
        })
        .await
    }

    async fn refresh(&self, key: &str, value: &str, ttl: u64) -> Result<(), StoreError> {
        let ttl = ttl.to_string();
        self.send(key, |http, url| {
            http.put(url).form(&[
                ("value", value),
                ("ttl", ttl.as_str()),
                ("prevExist", "true"),
            ])
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.send(key, |http, url| http.delete(url).query(&[("recursive", "false")]))
            .await
    }
}
