//! Deterministic in-memory `BenchmarkRepository`. No network I/O, no
//! database — the event log and item rows live in a `Mutex`-guarded `Vec`
//! so scenario tests can assert on exactly what was persisted.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use tsql_repository::{BenchmarkRepository, NewItem, NewRun, RepositoryError};

#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: Uuid,
    pub model_id: String,
    pub revision: String,
    pub db_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub run_id: Uuid,
    pub sequence: i64,
    pub kind: String,
    pub payload: Value,
}

#[derive(Default)]
struct Inner {
    runs: Vec<RunRow>,
    events: Vec<EventRow>,
    items: Vec<NewItem>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<RunRow> {
        self.inner.lock().unwrap().runs.clone()
    }

    pub fn events_for(&self, run_id: Uuid) -> Vec<EventRow> {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn items_for(&self, run_id: Uuid) -> Vec<NewItem> {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|i| i.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BenchmarkRepository for InMemoryRepository {
    async fn create_run(&self, run: NewRun) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.runs.push(RunRow {
            run_id: run.run_id,
            model_id: run.model_id,
            revision: run.revision,
            db_id: run.db_id,
            started_at: run.started_at,
            ended_at: None,
            status: None,
        });
        Ok(())
    }

    async fn end_run(&self, run_id: Uuid, status: &str) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.runs.iter_mut().find(|r| r.run_id == run_id) {
            row.ended_at = Some(Utc::now());
            row.status = Some(status.to_string());
        }
        Ok(())
    }

    async fn log_event(
        &self,
        run_id: Uuid,
        sequence: i64,
        kind: &str,
        payload: Value,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(EventRow {
            run_id,
            sequence,
            kind: kind.to_string(),
            payload,
        });
        Ok(())
    }

    async fn insert_item(&self, item: NewItem) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push(item);
        Ok(())
    }
}
