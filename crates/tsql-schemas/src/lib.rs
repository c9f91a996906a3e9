//! Shared wire and domain types for the benchmark orchestration engine.
//!
//! A dependency-light crate that every other crate (and the daemon's JSON
//! responses) can share without pulling in `tsql-coordinator` or
//! `tsql-repository`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Model reference
// ---------------------------------------------------------------------------

/// Numeric precision requested for accelerator residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Half,
    Bfloat,
    Single,
    Auto,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Half => "half",
            Precision::Bfloat => "bfloat",
            Precision::Single => "single",
            Precision::Auto => "auto",
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::Auto
    }
}

/// Identifier + immutable revision for a candidate model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    /// `ns/name` grammar, e.g. "defog/sqlcoder-7b-2".
    pub identifier: String,
    /// Opaque revision string (commit sha, tag). Mandatory under policy.
    pub revision: String,
    pub precision: Precision,
}

impl ModelRef {
    pub fn new(identifier: impl Into<String>, revision: impl Into<String>, precision: Precision) -> Self {
        Self {
            identifier: identifier.into(),
            revision: revision.into(),
            precision,
        }
    }

    /// Filesystem-safe key for this ref, ignoring precision (precision is
    /// folded into the accelerator residency key, not the on-disk path).
    pub fn store_key(&self) -> (String, String) {
        (self.identifier.replace('/', "__"), self.revision.clone())
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Closed set of comparison rules the scoring engine can apply.
/// Serialized as the open string the wire contract names in `match_kind`,
/// leaving room for future variants without a wire break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    SortedStringRows,
    ExecFailed,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::SortedStringRows => "sorted_string_rows",
            MatchKind::ExecFailed => "exec_failed",
        }
    }
}

/// Tri-state correctness: `Some(true)`/`Some(false)` when both statements
/// executed; `None` ("unknown") when either failed.
pub type Correctness = Option<bool>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringVerdict {
    pub pred_exec_success: bool,
    pub gold_exec_success: bool,
    pub is_correct: Correctness,
    pub pred_error: Option<String>,
    pub gold_error: Option<String>,
    pub rows_pred: Option<usize>,
    pub rows_gold: Option<usize>,
    pub match_kind: MatchKind,
    pub pred_exec_time_ms: Option<f64>,
    pub gold_exec_time_ms: Option<f64>,
    pub scoring_time_ms: f64,
}

// ---------------------------------------------------------------------------
// Generation metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStats {
    pub allocated_mb: f64,
    pub reserved_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub gen_time_ms: f64,
    pub exec_time_ms: f64,
    pub new_tokens: u32,
    pub tokens_per_s: f64,
    pub ram_delta_mb: f64,
    pub cpu_percent: f32,
    pub device: Option<DeviceStats>,
}

// ---------------------------------------------------------------------------
// Run parameters (request body, persisted verbatim in params_json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub limit: u32,
    pub offset: u32,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub do_sample: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            max_new_tokens: 256,
            temperature: 0.0,
            top_p: 1.0,
            do_sample: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Ok,
    ClientDisconnected,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::ClientDisconnected => "client_disconnected",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_id: Uuid,
    pub model_id: String,
    pub revision: String,
    pub db_id: String,
    pub params: RunParams,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

// ---------------------------------------------------------------------------
// Event stream payloads (tagged `kind`, see spec §6.2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaPayload {
    pub run_id: Uuid,
    pub worker_url: String,
    pub model_id: String,
    pub revision: String,
    pub db_id: String,
    #[serde(flatten)]
    pub params: RunParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub run_id: Uuid,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub run_id: Uuid,
    pub index: u32,
    pub question_id: String,
    pub db_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_index: Option<u32>,
    pub raw_answer: String,
    pub sql: String,
    pub gold_sql: String,
    pub gen_time_ms: f64,
    pub metrics: GenerationMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring: Option<ScoringVerdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonePayload {
    pub run_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub run_id: Uuid,
    pub error: String,
}

/// The full set of downstream event kinds, tagged for JSON transport.
/// `Passthrough` carries any upstream kind the coordinator does not
/// otherwise interpret, forwarded verbatim with `run_id` attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Meta(MetaPayload),
    Status(StatusPayload),
    Result(ResultPayload),
    Done(DonePayload),
    Error(ErrorPayload),
    Passthrough {
        run_id: Uuid,
        event: String,
        payload: serde_json::Value,
    },
}

impl RunEvent {
    pub fn kind_str(&self) -> &'static str {
        match self {
            RunEvent::Meta(_) => "meta",
            RunEvent::Status(_) => "status",
            RunEvent::Result(_) => "result",
            RunEvent::Done(_) => "done",
            RunEvent::Error(_) => "error",
            RunEvent::Passthrough { .. } => "passthrough",
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::Meta(p) => p.run_id,
            RunEvent::Status(p) => p.run_id,
            RunEvent::Result(p) => p.run_id,
            RunEvent::Done(p) => p.run_id,
            RunEvent::Error(p) => p.run_id,
            RunEvent::Passthrough { run_id, .. } => *run_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Question catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub db_id: String,
    pub question: String,
    pub gold_sql: Option<String>,
    pub split: String,
    pub source_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaTextOptions {
    pub use_original_names: bool,
    pub include_types: bool,
    pub max_columns_per_table: Option<usize>,
    pub max_total_chars: Option<usize>,
}
