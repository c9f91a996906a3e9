//! Streaming Coordinator: opens a run, contacts a worker over an
//! event-oriented transport, consumes upstream events, enriches each
//! result via the scoring engine, persists via the run repository,
//! re-emits downstream to the caller, honors cancellation, and closes the
//! run with a terminal status.
//!
//! Grounded on `global_benchmark_stream_service.py`'s event loop shape.

pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use tsql_repository::{BenchmarkRepository, NewItem, NewRun};
use tsql_sandbox::{Sandbox, SandboxOptions};
use tsql_schemas::{
    DonePayload, ErrorPayload, MetaPayload, ModelRef, ResultPayload, RunEvent, RunParams,
    RunStatus, StatusPayload,
};
use tsql_worker_select::WorkerSelector;

pub use transport::{SseWorkerTransport, TransportError, UpstreamEvent, WorkerTransport};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Repository(#[from] tsql_repository::RepositoryError),
    #[error(transparent)]
    Scoring(#[from] tsql_scoring::ScoringError),
}

/// Flipped by the HTTP layer when the client disconnects; checked before
/// reading each upstream event.
pub type CancelSignal = Arc<AtomicBool>;

pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerRequest {
    pub identifier: String,
    pub revision: String,
    pub db_id: String,
    #[serde(flatten)]
    pub params: RunParams,
}

pub struct Coordinator<T: WorkerTransport> {
    transport: Arc<T>,
    worker_selector: Arc<dyn WorkerSelector>,
    repository: Arc<dyn BenchmarkRepository>,
    sandbox: Arc<Sandbox>,
    sandbox_options: SandboxOptions,
}

impl<T: WorkerTransport> Coordinator<T> {
    pub fn new(
        transport: Arc<T>,
        worker_selector: Arc<dyn WorkerSelector>,
        repository: Arc<dyn BenchmarkRepository>,
        sandbox: Arc<Sandbox>,
        sandbox_options: SandboxOptions,
    ) -> Self {
        Self {
            transport,
            worker_selector,
            repository,
            sandbox,
            sandbox_options,
        }
    }

    /// Mints the run id, opens the run, and spawns the streaming task.
    /// Returns a receiver of downstream events the HTTP layer forwards
    /// verbatim (e.g. as SSE).
    pub async fn stream(
        &self,
        model_ref: ModelRef,
        db_id: String,
        params: RunParams,
        cancel: CancelSignal,
    ) -> Result<mpsc::Receiver<RunEvent>, CoordinatorError> {
        let run_id = Uuid::new_v4();
        let worker_url = self.worker_selector.select().await;

        self.repository
            .create_run(NewRun {
                run_id,
                model_id: model_ref.identifier.clone(),
                revision: model_ref.revision.clone(),
                db_id: db_id.clone(),
                params: params.clone(),
                started_at: Utc::now(),
            })
            .await?;

        let (downstream_tx, downstream_rx) = mpsc::channel(128);

        let transport = Arc::clone(&self.transport);
        let repository = Arc::clone(&self.repository);
        let sandbox = Arc::clone(&self.sandbox);
        let sandbox_options = self.sandbox_options;

        tokio::spawn(async move {
            run_loop(
                run_id,
                worker_url,
                model_ref,
                db_id,
                params,
                transport,
                repository,
                sandbox,
                sandbox_options,
                downstream_tx,
                cancel,
            )
            .await;
        });

        Ok(downstream_rx)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop<T: WorkerTransport>(
    run_id: Uuid,
    worker_url: String,
    model_ref: ModelRef,
    db_id: String,
    params: RunParams,
    transport: Arc<T>,
    repository: Arc<dyn BenchmarkRepository>,
    sandbox: Arc<Sandbox>,
    sandbox_options: SandboxOptions,
    downstream_tx: mpsc::Sender<RunEvent>,
    cancel: CancelSignal,
) {
    let span = tracing::info_span!("benchmark_run", %run_id);
    let _enter = span.enter();

    let mut sequence: i64 = 0;
    let mut item_index: u32 = 0;

    let meta = RunEvent::Meta(MetaPayload {
        run_id,
        worker_url: worker_url.clone(),
        model_id: model_ref.identifier.clone(),
        revision: model_ref.revision.clone(),
        db_id: db_id.clone(),
        params: params.clone(),
    });
    if persist_and_forward(&repository, &downstream_tx, run_id, &mut sequence, meta)
        .await
        .is_err()
    {
        let _ = repository.end_run(run_id, RunStatus::Error.as_str()).await;
        return;
    }

    let worker_request = WorkerRequest {
        identifier: model_ref.identifier.clone(),
        revision: model_ref.revision.clone(),
        db_id: db_id.clone(),
        params: params.clone(),
    };

    let mut upstream = match transport.open(&worker_url, &worker_request).await {
        Ok(rx) => rx,
        Err(e) => {
            let err_event = RunEvent::Error(ErrorPayload {
                run_id,
                error: e.to_string(),
            });
            let _ = persist_and_forward(&repository, &downstream_tx, run_id, &mut sequence, err_event).await;
            let _ = repository.end_run(run_id, RunStatus::Error.as_str()).await;
            return;
        }
    };

    let final_status = loop {
        if cancel.load(Ordering::SeqCst) {
            break RunStatus::ClientDisconnected;
        }

        let Some(event) = upstream.recv().await else {
            break RunStatus::Ok;
        };

        match event.kind.as_str() {
            "status" => {
                let status_event = RunEvent::Status(StatusPayload {
                    run_id,
                    phase: event
                        .payload
                        .get("phase")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                    ms: event.payload.get("ms").and_then(|v| v.as_f64()),
                });
                if persist_and_forward(&repository, &downstream_tx, run_id, &mut sequence, status_event)
                    .await
                    .is_err()
                {
                    break RunStatus::Error;
                }
            }
            "result" => {
                match handle_result_event(run_id, item_index, &event.payload, &sandbox, sandbox_options).await {
                    Ok((result_event, new_item)) => {
                        item_index += 1;
                        if persist_and_forward(
                            &repository,
                            &downstream_tx,
                            run_id,
                            &mut sequence,
                            result_event,
                        )
                        .await
                        .is_err()
                        {
                            break RunStatus::Error;
                        }
                        // Per-item persistence happens after per-event
                        // persistence, never before.
                        if repository.insert_item(new_item).await.is_err() {
                            break RunStatus::Error;
                        }
                    }
                    Err(_) => break RunStatus::Error,
                }
            }
            "done" => {
                let done_event = RunEvent::Done(DonePayload {
                    run_id,
                    status: RunStatus::Ok.as_str().to_string(),
                });
                let _ =
                    persist_and_forward(&repository, &downstream_tx, run_id, &mut sequence, done_event).await;
                break RunStatus::Ok;
            }
            other => {
                let passthrough = RunEvent::Passthrough {
                    run_id,
                    event: other.to_string(),
                    payload: event.payload.clone(),
                };
                if persist_and_forward(&repository, &downstream_tx, run_id, &mut sequence, passthrough)
                    .await
                    .is_err()
                {
                    break RunStatus::Error;
                }
            }
        }
    };

    if final_status == RunStatus::Error {
        let err_event = RunEvent::Error(ErrorPayload {
            run_id,
            error: "worker stream failed".to_string(),
        });
        let _ = persist_and_forward(&repository, &downstream_tx, run_id, &mut sequence, err_event).await;
    }

    let _ = repository.end_run(run_id, final_status.as_str()).await;
}

/// Durable-before-emit: persists the event, then forwards it downstream.
/// `Err` means persistence failed and the run must terminate.
async fn persist_and_forward(
    repository: &Arc<dyn BenchmarkRepository>,
    downstream_tx: &mpsc::Sender<RunEvent>,
    run_id: Uuid,
    sequence: &mut i64,
    event: RunEvent,
) -> Result<(), ()> {
    let payload = serde_json::to_value(&event).map_err(|_| ())?;
    if repository
        .log_event(run_id, *sequence, event.kind_str(), payload)
        .await
        .is_err()
    {
        return Err(());
    }
    *sequence += 1;

    let is_terminal = matches!(event, RunEvent::Done(_) | RunEvent::Error(_));
    let _ = downstream_tx.send(event).await;
    if is_terminal {
        // Nothing else to forward after a terminal event.
        return Ok(());
    }
    Ok(())
}

async fn handle_result_event(
    run_id: Uuid,
    index: u32,
    payload: &Value,
    sandbox: &Arc<Sandbox>,
    sandbox_options: SandboxOptions,
) -> Result<(RunEvent, NewItem), CoordinatorError> {
    let question_id = payload
        .get("question_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let db_id = payload
        .get("db_id")
        .or_else(|| payload.get("dataset_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let source_index = payload.get("source_index").and_then(|v| v.as_u64()).map(|n| n as u32);
    let raw_answer = payload
        .get("raw_answer")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let sql = payload
        .get("predicted_sql")
        .or_else(|| payload.get("sql"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let gold_sql = payload
        .get("gold_sql")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let gen_time_ms = payload.get("gen_time_ms").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let metrics: tsql_schemas::GenerationMetrics = payload
        .get("metrics")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(tsql_schemas::GenerationMetrics {
            gen_time_ms,
            exec_time_ms: gen_time_ms,
            new_tokens: 0,
            tokens_per_s: 0.0,
            ram_delta_mb: 0.0,
            cpu_percent: 0.0,
            device: None,
        });

    let scoring = if !sql.is_empty() && !gold_sql.is_empty() && !db_id.is_empty() {
        Some(tsql_scoring::score(Arc::clone(sandbox), &db_id, &sql, &gold_sql, sandbox_options).await?)
    } else {
        None
    };

    let metrics_json = serde_json::to_value(&metrics).unwrap_or(Value::Null);
    let new_item = NewItem {
        run_id,
        index,
        question_id: question_id.clone(),
        db_id: db_id.clone(),
        source_index,
        raw_answer: raw_answer.clone(),
        sql: sql.clone(),
        gold_sql: gold_sql.clone(),
        gen_time_ms,
        metrics_json,
        scoring: scoring.clone(),
    };

    let result_event = RunEvent::Result(ResultPayload {
        run_id,
        index,
        question_id,
        db_id,
        source_index,
        raw_answer,
        sql,
        gold_sql,
        gen_time_ms,
        metrics,
        scoring,
    });

    Ok((result_event, new_item))
}
