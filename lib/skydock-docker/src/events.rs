//! Decoding of the Docker `/events` stream
//!
//! The daemon writes one JSON object per line and keeps the response open.
//! Chunks do not line up with lines, so bytes are buffered until a newline
//! arrives.

use serde::Deserialize;
use skydock_core::{EventKind, WorkloadEvent};

#[derive(Debug, Deserialize)]
struct Actor {
    #[serde(rename = "ID", default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DockerEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: Option<Actor>,
}

/// Parse one event line. Events about anything other than containers, and
/// lines without a status or id, yield `None`.
pub fn parse_event(line: &str) -> serde_json::Result<Option<WorkloadEvent>> {
    let event: DockerEvent = serde_json::from_str(line)?;

    if let Some(kind) = event.kind.as_deref() {
        if kind != "container" {
            return Ok(None);
        }
    }

    let status = event.status.or(event.action);
    let id = event.id.or(event.actor.and_then(|a| a.id));
    Ok(match (status, id) {
        (Some(status), Some(id)) => Some(WorkloadEvent::new(EventKind::parse(&status), id)),
        _ => None,
    })
}

/// Splits a byte stream into lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }
}
