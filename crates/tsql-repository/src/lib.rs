//! Run Repository: persists run headers, the per-event log, and per-item
//! enriched results. One connection pool, one transaction per
//! `log_event`/`insert_item` call — small, durable writes, never batched
//! across the event boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use tsql_schemas::{RunParams, ScoringVerdict};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: Uuid,
    pub model_id: String,
    pub revision: String,
    pub db_id: String,
    pub params: RunParams,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub run_id: Uuid,
    pub index: u32,
    pub question_id: String,
    pub db_id: String,
    pub source_index: Option<u32>,
    pub raw_answer: String,
    pub sql: String,
    pub gold_sql: String,
    pub gen_time_ms: f64,
    pub metrics_json: Value,
    pub scoring: Option<ScoringVerdict>,
}

/// Storage-agnostic contract the coordinator depends on; `tsql-testkit`
/// ships an in-memory implementation for tests without a database.
#[async_trait]
pub trait BenchmarkRepository: Send + Sync {
    async fn create_run(&self, run: NewRun) -> Result<(), RepositoryError>;
    async fn end_run(&self, run_id: Uuid, status: &str) -> Result<(), RepositoryError>;
    async fn log_event(
        &self,
        run_id: Uuid,
        sequence: i64,
        kind: &str,
        payload: Value,
    ) -> Result<(), RepositoryError>;
    async fn insert_item(&self, item: NewItem) -> Result<(), RepositoryError>;
}

pub struct PgBenchmarkRepository {
    pool: PgPool,
}

impl PgBenchmarkRepository {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await
            .context("connect to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run embedded migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepositoryStatus {
    pub ok: bool,
    pub has_bench_runs_table: bool,
}

/// Connectivity + schema presence check for operator tooling, independent
/// of any particular `BenchmarkRepository` instance.
pub async fn status(pool: &PgPool) -> Result<RepositoryStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'bench_runs'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status schema check failed")?;

    Ok(RepositoryStatus {
        ok: one == 1,
        has_bench_runs_table: exists,
    })
}

#[async_trait]
impl BenchmarkRepository for PgBenchmarkRepository {
    async fn create_run(&self, run: NewRun) -> Result<(), RepositoryError> {
        let params_json = serde_json::to_value(&run.params).unwrap_or(Value::Null);
        sqlx::query(
            "INSERT INTO bench_runs (run_id, model_id, revision, db_id, params_json, started_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'running')",
        )
        .bind(run.run_id)
        .bind(&run.model_id)
        .bind(&run.revision)
        .bind(&run.db_id)
        .bind(params_json)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn end_run(&self, run_id: Uuid, status: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE bench_runs SET ended_at = now(), status = $2 WHERE run_id = $1",
        )
        .bind(run_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_event(
        &self,
        run_id: Uuid,
        sequence: i64,
        kind: &str,
        payload: Value,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bench_events (run_id, sequence, kind, payload_json, at) \
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(run_id)
        .bind(sequence)
        .bind(kind)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_item(&self, item: NewItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bench_items (
                run_id, index_in_run, question_id, db_id, source_index,
                raw_answer, sql, gold_sql, gen_time_ms, metrics_json,
                pred_exec_success, gold_exec_success, is_correct,
                pred_error, gold_error, rows_pred, rows_gold, match_kind
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)",
        )
        .bind(item.run_id)
        .bind(item.index as i32)
        .bind(&item.question_id)
        .bind(&item.db_id)
        .bind(item.source_index.map(|i| i as i32))
        .bind(&item.raw_answer)
        .bind(&item.sql)
        .bind(&item.gold_sql)
        .bind(item.gen_time_ms)
        .bind(item.metrics_json)
        .bind(item.scoring.as_ref().map(|s| s.pred_exec_success))
        .bind(item.scoring.as_ref().map(|s| s.gold_exec_success))
        .bind(item.scoring.as_ref().and_then(|s| s.is_correct))
        .bind(item.scoring.as_ref().and_then(|s| s.pred_error.clone()))
        .bind(item.scoring.as_ref().and_then(|s| s.gold_error.clone()))
        .bind(item.scoring.as_ref().and_then(|s| s.rows_pred).map(|n| n as i32))
        .bind(item.scoring.as_ref().and_then(|s| s.rows_gold).map(|n| n as i32))
        .bind(item.scoring.as_ref().map(|s| s.match_kind.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
