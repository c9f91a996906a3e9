//! Request/response DTOs for the HTTP surface. Kept separate from
//! `tsql_schemas` because these shapes are specific to the wire request
//! body, not to internal persistence or the event stream payloads.

use serde::{Deserialize, Serialize};
use tsql_schemas::Precision;

fn default_limit() -> u32 {
    100
}
fn default_max_new_tokens() -> u32 {
    256
}
fn default_top_p() -> f32 {
    1.0
}
fn default_dtype() -> Precision {
    Precision::Auto
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub model: String,
    pub revision: Option<String>,
    pub db_id: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub do_sample: bool,
    #[serde(default = "default_dtype")]
    pub dtype: Precision,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub queue_capacity: usize,
    pub resident_model: Option<String>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
