//! SQL Sandbox: executes a single statement against a dataset with a hard
//! wall-clock bound, a row cap, and read-only transaction semantics.
//!
//! The `relational` kind mirrors the interrupt-driven timeout in the
//! original Python executor: a background thread trips `Connection::interrupt()`
//! once the deadline passes, and rows are drained in fixed-size batches up
//! to `max_rows`. The sandbox never raises from the caller's perspective —
//! failures are reported as data in `ExecOutcome`, not as `Err`.

use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tsql_dataset::DatasetLocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    Relational,
    Columnar,
    ExternalRelational,
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxOptions {
    pub timeout_ms: u64,
    pub max_rows: usize,
    pub batch_size: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 2500,
            max_rows: 2000,
            batch_size: 200,
        }
    }
}

/// Error taxonomy surfaced in `ExecOutcome.error`. These never leave the
/// sandbox as `Err` — they are recorded as data next to a `success: false`
/// outcome (soft row-limit overflow excepted, which keeps `success: true`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxErrorKind {
    TimeoutExceeded,
    RowLimitExceeded,
    SyntaxError,
    RuntimeError,
    ConnectError,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    DatasetLocator(#[from] tsql_dataset::DatasetLocatorError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub elapsed_ms: f64,
    pub error: Option<String>,
    pub error_kind: Option<SandboxErrorKind>,
    /// Set when the row cap truncated output; `success` stays `true`.
    pub row_limit_exceeded: bool,
}

impl ExecOutcome {
    fn failure(kind: SandboxErrorKind, message: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            elapsed_ms,
            error: Some(message.into()),
            error_kind: Some(kind),
            row_limit_exceeded: false,
        }
    }
}

pub struct Sandbox {
    locator: DatasetLocator,
}

impl Sandbox {
    pub fn new(locator: DatasetLocator) -> Self {
        Self { locator }
    }

    /// Execute `code` against `dataset_id` under `kind`. Never returns `Err`
    /// for statement-level failures; `Err` is reserved for dataset
    /// resolution failures (a configuration problem, not sandbox data).
    pub fn execute(
        &self,
        kind: SandboxKind,
        dataset_id: &str,
        code: &str,
        options: SandboxOptions,
    ) -> Result<ExecOutcome, SandboxError> {
        match kind {
            SandboxKind::Relational => {
                let path = self.locator.sqlite_path(dataset_id)?;
                Ok(execute_relational(&path, code, options))
            }
            SandboxKind::Columnar => Ok(ExecOutcome::failure(
                SandboxErrorKind::RuntimeError,
                "unsupported sandbox kind: columnar",
                0.0,
            )),
            SandboxKind::ExternalRelational => Ok(ExecOutcome::failure(
                SandboxErrorKind::RuntimeError,
                "external_relational requires a configured Postgres pool; use \
                 tsql_sandbox::external::execute_external_relational directly",
                0.0,
            )),
        }
    }
}

fn execute_relational(path: &Path, code: &str, options: SandboxOptions) -> ExecOutcome {
    let started = Instant::now();

    let uri = format!("file:{}?mode=ro", path.display());
    let conn = match Connection::open_with_flags(
        &uri,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
    ) {
        Ok(c) => c,
        Err(e) => {
            return ExecOutcome::failure(
                SandboxErrorKind::ConnectError,
                e.to_string(),
                elapsed_ms(started),
            )
        }
    };

    let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
    conn.progress_handler(10_000, Some(move || Instant::now() > deadline));

    let outcome = run_statement(&conn, code, options, started);
    conn.progress_handler::<fn() -> bool>(0, None);
    outcome
}

fn run_statement(
    conn: &Connection,
    code: &str,
    options: SandboxOptions,
    started: Instant,
) -> ExecOutcome {
    let result: rusqlite::Result<ExecOutcome> = (|| {
        conn.execute_batch("BEGIN READ ONLY;")?;
        let guard = RollbackGuard { conn };

        let mut stmt = conn.prepare(code)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows_out: Vec<Vec<Option<String>>> = Vec::new();
        let mut truncated = false;
        let mut rows = stmt.query([])?;

        'outer: loop {
            for _ in 0..options.batch_size {
                match rows.next()? {
                    Some(row) => {
                        let mut r = Vec::with_capacity(columns.len());
                        for i in 0..columns.len() {
                            let v: rusqlite::types::Value = row.get(i)?;
                            r.push(value_to_string(v));
                        }
                        rows_out.push(r);
                        if rows_out.len() >= options.max_rows {
                            truncated = true;
                            break 'outer;
                        }
                    }
                    None => break 'outer,
                }
            }
        }

        drop(guard);

        Ok(ExecOutcome {
            success: true,
            columns,
            rows: rows_out,
            elapsed_ms: elapsed_ms(started),
            error: None,
            error_kind: if truncated {
                Some(SandboxErrorKind::RowLimitExceeded)
            } else {
                None
            },
            row_limit_exceeded: truncated,
        })
    })();

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            let elapsed = elapsed_ms(started);
            let msg = e.to_string();
            if msg.to_lowercase().contains("interrupt") {
                ExecOutcome::failure(SandboxErrorKind::TimeoutExceeded, "timeout", elapsed)
            } else if msg.to_lowercase().contains("syntax") {
                ExecOutcome::failure(SandboxErrorKind::SyntaxError, msg, elapsed)
            } else {
                ExecOutcome::failure(SandboxErrorKind::RuntimeError, msg, elapsed)
            }
        }
    }
}

/// Ensures `ROLLBACK` runs on every exit path, including the `?` early
/// returns above.
struct RollbackGuard<'a> {
    conn: &'a Connection,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        let _ = self.conn.execute_batch("ROLLBACK;");
    }
}

fn value_to_string(v: rusqlite::types::Value) -> Option<String> {
    use rusqlite::types::Value as V;
    match v {
        V::Null => None,
        V::Integer(i) => Some(i.to_string()),
        V::Real(f) => Some(f.to_string()),
        V::Text(s) => Some(s),
        V::Blob(b) => Some(format!("<blob:{} bytes>", b.len())),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// `external_relational`: executes against a Postgres-backed dataset.
/// Isolated in its own module so the synchronous, non-Postgres-dependent
/// majority of callers do not need an async runtime.
pub mod external {
    use super::*;
    use sqlx::{PgPool, Row};

    /// Opens `BEGIN READ ONLY`, applies `SET LOCAL statement_timeout`, runs
    /// `code`, and always issues `ROLLBACK` on the way out — including on
    /// error — since the dataset is immutable and writes must never stick.
    pub async fn execute_external_relational(
        pool: &PgPool,
        code: &str,
        options: SandboxOptions,
    ) -> ExecOutcome {
        let started = Instant::now();

        let mut tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                return ExecOutcome::failure(
                    SandboxErrorKind::ConnectError,
                    e.to_string(),
                    elapsed_ms(started),
                )
            }
        };

        if let Err(e) = sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
        {
            return ExecOutcome::failure(
                SandboxErrorKind::RuntimeError,
                e.to_string(),
                elapsed_ms(started),
            );
        }
        if let Err(e) = sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            options.timeout_ms
        ))
        .execute(&mut *tx)
        .await
        {
            return ExecOutcome::failure(
                SandboxErrorKind::RuntimeError,
                e.to_string(),
                elapsed_ms(started),
            );
        }

        let outcome = match sqlx::query(code).fetch_all(&mut *tx).await {
            Ok(pg_rows) => {
                let columns: Vec<String> = pg_rows
                    .first()
                    .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default();
                let truncated = pg_rows.len() > options.max_rows;
                let rows = pg_rows
                    .into_iter()
                    .take(options.max_rows)
                    .map(|r| {
                        (0..columns.len())
                            .map(|i| r.try_get::<Option<String>, _>(i).unwrap_or(None))
                            .collect()
                    })
                    .collect();
                ExecOutcome {
                    success: true,
                    columns,
                    rows,
                    elapsed_ms: elapsed_ms(started),
                    error: None,
                    error_kind: if truncated {
                        Some(SandboxErrorKind::RowLimitExceeded)
                    } else {
                        None
                    },
                    row_limit_exceeded: truncated,
                }
            }
            Err(e) => {
                let msg = e.to_string();
                let kind = if msg.to_lowercase().contains("statement timeout") {
                    SandboxErrorKind::TimeoutExceeded
                } else if msg.to_lowercase().contains("syntax") {
                    SandboxErrorKind::SyntaxError
                } else {
                    SandboxErrorKind::RuntimeError
                };
                ExecOutcome::failure(kind, msg, elapsed_ms(started))
            }
        };

        let _ = tx.rollback().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_dataset(tmp: &tempfile::TempDir, db_id: &str, setup_sql: &str) -> DatasetLocator {
        let dir = tmp.path().join(db_id);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{db_id}.sqlite"));
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(setup_sql).unwrap();
        drop(conn);
        DatasetLocator::new(tmp.path())
    }

    #[test]
    fn executes_simple_select() {
        let tmp = tempfile::tempdir().unwrap();
        let locator = make_dataset(
            &tmp,
            "shop_sqlite",
            "CREATE TABLE orders(order_id INT, customer_id INT);
             INSERT INTO orders VALUES (10,1),(11,1),(12,2),(13,1);",
        );
        let sandbox = Sandbox::new(locator);
        let outcome = sandbox
            .execute(
                SandboxKind::Relational,
                "shop_sqlite",
                "SELECT customer_id, COUNT(*) AS n FROM orders GROUP BY customer_id ORDER BY customer_id;",
                SandboxOptions::default(),
            )
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.columns, vec!["customer_id", "n"]);
    }

    #[test]
    fn syntax_error_is_data_not_a_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let locator = make_dataset(&tmp, "d1", "CREATE TABLE t(a INT);");
        let sandbox = Sandbox::new(locator);
        let outcome = sandbox
            .execute(SandboxKind::Relational, "d1", "SELEC * FRM t;", SandboxOptions::default())
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn row_cap_truncates_softly() {
        let tmp = tempfile::tempdir().unwrap();
        let mut setup = String::from("CREATE TABLE t(a INT);");
        for i in 0..50 {
            setup.push_str(&format!("INSERT INTO t VALUES ({i});"));
        }
        let locator = make_dataset(&tmp, "d2", &setup);
        let sandbox = Sandbox::new(locator);
        let mut opts = SandboxOptions::default();
        opts.max_rows = 10;
        opts.batch_size = 4;
        let outcome = sandbox
            .execute(SandboxKind::Relational, "d2", "SELECT a FROM t;", opts)
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.row_limit_exceeded);
        assert_eq!(outcome.rows.len(), 10);
    }

    #[test]
    fn columnar_kind_is_an_unsupported_passthrough() {
        let tmp = tempfile::tempdir().unwrap();
        let locator = DatasetLocator::new(tmp.path());
        let sandbox = Sandbox::new(locator);
        let outcome = sandbox
            .execute(SandboxKind::Columnar, "anything", "SELECT 1", SandboxOptions::default())
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(SandboxErrorKind::RuntimeError));
    }
}
