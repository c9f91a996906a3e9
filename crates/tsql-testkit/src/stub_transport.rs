//! Scripted `WorkerTransport`: feeds a pre-built sequence of upstream
//! events (or a connect failure) with no network I/O, so coordinator
//! scenario tests are deterministic and fast.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};

use tsql_coordinator::{TransportError, UpstreamEvent, WorkerTransport};

/// One scripted script per test. `open()` ignores `base_url`/`request` and
/// simply replays `events` (or returns `connect_error` if set).
///
/// When `gate` is set, the first event is sent immediately; every
/// subsequent event waits for a `Notify` permit before it is sent. Tests
/// use this to pace the upstream send against the downstream receive, so a
/// cancellation can be injected deterministically between two events
/// instead of racing a burst of buffered sends.
pub struct StubWorkerTransport {
    events: Mutex<Option<Vec<UpstreamEvent>>>,
    connect_error: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl StubWorkerTransport {
    pub fn scripted(events: Vec<UpstreamEvent>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
            connect_error: None,
            gate: None,
        }
    }

    pub fn scripted_gated(events: Vec<UpstreamEvent>, gate: Arc<Notify>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
            connect_error: None,
            gate: Some(gate),
        }
    }

    pub fn failing_to_connect(message: impl Into<String>) -> Self {
        Self {
            events: Mutex::new(Some(Vec::new())),
            connect_error: Some(message.into()),
            gate: None,
        }
    }

    pub fn event(kind: impl Into<String>, payload: Value) -> UpstreamEvent {
        UpstreamEvent {
            kind: kind.into(),
            payload,
        }
    }
}

#[async_trait]
impl WorkerTransport for StubWorkerTransport {
    async fn open(
        &self,
        _base_url: &str,
        _request: &(impl Serialize + Sync),
    ) -> Result<mpsc::Receiver<UpstreamEvent>, TransportError> {
        if let Some(message) = &self.connect_error {
            return Err(TransportError::ConnectError(message.clone()));
        }

        let events = self
            .events
            .lock()
            .await
            .take()
            .expect("StubWorkerTransport::open called more than once per script");

        let gate = self.gate.clone();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for (i, event) in events.into_iter().enumerate() {
                if i > 0 {
                    if let Some(g) = &gate {
                        g.notified().await;
                    }
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            // Dropping `tx` here closes the channel, which the coordinator
            // reads as upstream EOF if no explicit `done`/`error` was sent
            // (used by the client-disconnect scenario).
        });

        Ok(rx)
    }
}
