//! Docker Engine API client over hyper HTTP/1 connections

use crate::events::{parse_event, LineBuffer};
use crate::host::DockerHost;
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{header, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use skydock_core::{
    EventStream, RuntimeError, Workload, WorkloadRuntime, WorkloadSummary,
};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info, warn};

/// `/events` restricted to container events (`filters={"type":["container"]}`)
const EVENTS_PATH: &str = "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D";

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Image")]
    image: String,
}

#[derive(Debug, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Image")]
    image: String,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, EndpointSettings>,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Config")]
    config: ContainerConfig,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: NetworkSettings,
}

impl From<ContainerInspect> for Workload {
    fn from(inspect: ContainerInspect) -> Self {
        let settings = inspect.network_settings;
        // containers on user-defined networks only report per-network addresses
        let address = if settings.ip_address.is_empty() {
            settings
                .networks
                .into_values()
                .map(|n| n.ip_address)
                .find(|ip| !ip.is_empty())
                .unwrap_or_default()
        } else {
            settings.ip_address
        };

        Workload {
            id: inspect.id,
            image: inspect.config.image,
            address,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn transport<E>(e: E) -> RuntimeError
where
    E: std::error::Error + Send + Sync + 'static,
{
    RuntimeError::Transport(Box::new(e))
}

/// DockerClient opens one HTTP/1 connection per request to the daemon
#[derive(Clone, Debug)]
pub struct DockerClient {
    host: DockerHost,
}

impl DockerClient {
    pub fn new(host: DockerHost) -> Self {
        Self { host }
    }

    async fn connect(&self) -> Result<SendRequest<Empty<Bytes>>, RuntimeError> {
        match &self.host {
            DockerHost::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(transport)?;
                Self::handshake(stream).await
            }
            DockerHost::Tcp(authority) => {
                let stream = TcpStream::connect(authority.as_str()).await.map_err(transport)?;
                Self::handshake(stream).await
            }
        }
    }

    async fn handshake<S>(stream: S) -> Result<SendRequest<Empty<Bytes>>, RuntimeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(transport)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Docker connection closed: {}", e);
            }
        });

        Ok(sender)
    }

    /// Issue a GET and fail on non-2xx responses. The returned sender keeps
    /// the connection alive for streamed bodies.
    async fn get(
        &self,
        path: &str,
    ) -> Result<(SendRequest<Empty<Bytes>>, Response<Incoming>), RuntimeError> {
        let mut sender = self.connect().await?;
        let request = Request::get(path)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| RuntimeError::InvalidEndpoint(e.to_string()))?;

        debug!("GET {} on {}", path, self.host);
        let response = sender.send_request(request).await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|b| b.to_bytes())
                .unwrap_or_default();
            let message = serde_json::from_slice::<ApiError>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
            return Err(RuntimeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok((sender, response))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let (_sender, response) = self.get(path).await?;
        let body = response.into_body().collect().await.map_err(transport)?.to_bytes();
        Ok(serde_json::from_slice(&body)?)
    }
}

fn event_stream(sender: SendRequest<Empty<Bytes>>, body: Incoming) -> EventStream {
    let state = (sender, body, LineBuffer::new());
    Box::pin(futures::stream::unfold(
        state,
        |(sender, mut body, mut lines)| async move {
            loop {
                while let Some(line) = lines.next_line() {
                    match parse_event(&line) {
                        Ok(Some(event)) => return Some((Ok(event), (sender, body, lines))),
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(line = %line, "Undecodable docker event");
                            return Some((Err(RuntimeError::Decode(e)), (sender, body, lines)));
                        }
                    }
                }

                match body.frame().await {
                    Some(Ok(frame)) => {
                        if let Ok(data) = frame.into_data() {
                            lines.push(&data);
                        }
                    }
                    Some(Err(e)) => return Some((Err(transport(e)), (sender, body, lines))),
                    None => {
                        info!("Docker event stream closed");
                        return None;
                    }
                }
            }
        },
    ))
}

#[async_trait]
impl WorkloadRuntime for DockerClient {
    async fn list_running(&self) -> Result<Vec<WorkloadSummary>, RuntimeError> {
        let containers: Vec<ContainerSummary> = self.get_json("/containers/json").await?;
        debug!("Listed {} running containers", containers.len());
        Ok(containers
            .into_iter()
            .map(|c| WorkloadSummary {
                id: c.id,
                image: c.image,
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<Workload, RuntimeError> {
        let inspect: ContainerInspect = self.get_json(&format!("/containers/{}/json", id)).await?;
        Ok(inspect.into())
    }

    async fn subscribe(&self) -> Result<EventStream, RuntimeError> {
        let (sender, response) = self.get(EVENTS_PATH).await?;
        info!("Attached to docker event stream on {}", self.host);
        Ok(event_stream(sender, response.into_body()))
    }
}
