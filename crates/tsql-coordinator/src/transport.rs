//! Upstream worker transport: issues one POST and reads a chunked
//! `text/event-stream` body back, line-framed into typed events. Ported
//! from the Python original's `infrastructure/sse/sse_client.py`.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct UpstreamEvent {
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("worker connect error: {0}")]
    ConnectError(String),
    #[error("worker protocol error: {0}")]
    ProtocolError(String),
}

#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Opens the upstream connection and returns a receiver of parsed
    /// events. The sender side is driven by a background task so callers
    /// get a plain channel regardless of the underlying HTTP client.
    async fn open(
        &self,
        base_url: &str,
        request: &(impl Serialize + Sync),
    ) -> Result<mpsc::Receiver<UpstreamEvent>, TransportError>;
}

pub struct SseWorkerTransport {
    client: reqwest::Client,
}

impl Default for SseWorkerTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WorkerTransport for SseWorkerTransport {
    async fn open(
        &self,
        base_url: &str,
        request: &(impl Serialize + Sync),
    ) -> Result<mpsc::Receiver<UpstreamEvent>, TransportError> {
        let body = serde_json::to_value(request)
            .map_err(|e| TransportError::ProtocolError(e.to_string()))?;

        let response = self
            .client
            .post(format!("{base_url}/v1/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::ConnectError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::ConnectError(format!(
                "worker responded with status {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream().eventsource();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(_) => break,
                };
                let kind = if event.event.is_empty() {
                    "message".to_string()
                } else {
                    event.event
                };
                let payload: Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => Value::String(event.data),
                };
                if tx.send(UpstreamEvent { kind, payload }).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
