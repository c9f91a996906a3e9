//! HTTP routes. The run endpoint streams `text/event-stream` directly off
//! the coordinator's per-run channel; health/status are plain JSON.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use tokio::sync::mpsc;

use tsql_admission::{AdmissionError, AdmissionRequest};
use tsql_coordinator::{new_cancel_signal, CancelSignal};
use tsql_schemas::RunEvent;

use crate::api_types::{ErrorResponse, HealthResponse, RunRequest, StatusResponse};
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/run", post(run))
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
    })
}

async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        queue_capacity: state.config.queue_maxsize,
        resident_model: None,
        uptime_secs: state.uptime_secs(),
    })
}

async fn run(
    State(state): State<SharedState>,
    Json(body): Json<RunRequest>,
) -> axum::response::Response {
    let admission_req = AdmissionRequest {
        model: body.model,
        revision: body.revision,
        db_id: body.db_id,
        limit: body.limit,
        offset: body.offset,
        dtype: body.dtype,
        params: tsql_schemas::RunParams {
            limit: body.limit,
            offset: body.offset,
            max_new_tokens: body.max_new_tokens,
            temperature: body.temperature,
            top_p: body.top_p,
            do_sample: body.do_sample,
        },
    };

    let job = match state.admission.admit(admission_req).await {
        Ok(job) => job,
        Err(e) => return admission_error_response(e),
    };

    let cancel = new_cancel_signal();
    let downstream = match state
        .coordinator
        .stream(job.model_ref, job.db_id, job.params, Arc::clone(&cancel))
        .await
    {
        Ok(rx) => rx,
        Err(e) => {
            return (
                axum::http::StatusCode::BAD_GATEWAY,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response();
        }
    };

    let stream = CancelOnDrop {
        inner: downstream,
        cancel,
    };

    Sse::new(RunEventStream(stream))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn admission_error_response(err: AdmissionError) -> axum::response::Response {
    let status = match err {
        AdmissionError::RateLimited => axum::http::StatusCode::TOO_MANY_REQUESTS,
        AdmissionError::InvalidModelRef(_)
        | AdmissionError::MissingRevision
        | AdmissionError::LimitOutOfRange(_) => axum::http::StatusCode::BAD_REQUEST,
        AdmissionError::ModelStore(_) | AdmissionError::Accelerator(_) => {
            axum::http::StatusCode::BAD_GATEWAY
        }
    };
    (status, Json(ErrorResponse { error: err.to_string() })).into_response()
}

/// Wraps the coordinator's downstream receiver; if this value is dropped
/// before the stream reached `done`/`error` (the client disconnected),
/// flip the cancel signal so `run_loop` stops and marks the run
/// `client_disconnected` instead of running to completion unobserved.
struct CancelOnDrop {
    inner: mpsc::Receiver<RunEvent>,
    cancel: CancelSignal,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

struct RunEventStream(CancelOnDrop);

impl Stream for RunEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.0.inner.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let kind = event.kind_str();
                let sse_event = match serde_json::to_string(&event) {
                    Ok(json) => Event::default().event(kind).data(json),
                    Err(e) => Event::default().event("error").data(e.to_string()),
                };
                Poll::Ready(Some(Ok(sse_event)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
