//! Scoring Engine: runs a predicted and a gold SQL statement through the
//! sandbox and produces a structured comparison verdict using the
//! sorted-string-rows rule.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tsql_sandbox::{Sandbox, SandboxKind, SandboxOptions};
use tsql_schemas::{Correctness, MatchKind, ScoringVerdict};

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("sandbox join failed: {0}")]
    JoinFailed(String),
    #[error(transparent)]
    Sandbox(#[from] tsql_sandbox::SandboxError),
}

/// Scores `pred_sql` against `gold_sql` over `dataset_id`. `pred` and `gold`
/// run concurrently on the blocking-task pool so neither statement's wall
/// clock is inflated by waiting on the other.
pub async fn score(
    sandbox: Arc<Sandbox>,
    dataset_id: &str,
    pred_sql: &str,
    gold_sql: &str,
    options: SandboxOptions,
) -> Result<ScoringVerdict, ScoringError> {
    let started = Instant::now();

    let sandbox_pred = Arc::clone(&sandbox);
    let dataset_id_pred = dataset_id.to_string();
    let pred_sql_owned = pred_sql.to_string();
    let pred_fut = tokio::task::spawn_blocking(move || {
        sandbox_pred.execute(SandboxKind::Relational, &dataset_id_pred, &pred_sql_owned, options)
    });

    let sandbox_gold = Arc::clone(&sandbox);
    let dataset_id_gold = dataset_id.to_string();
    let gold_sql_owned = gold_sql.to_string();
    let gold_fut = tokio::task::spawn_blocking(move || {
        sandbox_gold.execute(SandboxKind::Relational, &dataset_id_gold, &gold_sql_owned, options)
    });

    let (pred_res, gold_res) = tokio::join!(pred_fut, gold_fut);
    let pred = pred_res.map_err(|e| ScoringError::JoinFailed(e.to_string()))??;
    let gold = gold_res.map_err(|e| ScoringError::JoinFailed(e.to_string()))??;

    let scoring_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    if !pred.success || !gold.success {
        return Ok(ScoringVerdict {
            pred_exec_success: pred.success,
            gold_exec_success: gold.success,
            is_correct: None,
            pred_error: pred.error,
            gold_error: gold.error,
            rows_pred: None,
            rows_gold: None,
            match_kind: MatchKind::ExecFailed,
            pred_exec_time_ms: Some(pred.elapsed_ms),
            gold_exec_time_ms: Some(gold.elapsed_ms),
            scoring_time_ms,
        });
    }

    let pred_rows = normalize_rows(&pred.rows);
    let gold_rows = normalize_rows(&gold.rows);
    let is_correct: Correctness = Some(pred_rows == gold_rows);

    Ok(ScoringVerdict {
        pred_exec_success: true,
        gold_exec_success: true,
        is_correct,
        pred_error: None,
        gold_error: None,
        rows_pred: Some(pred.rows.len()),
        rows_gold: Some(gold.rows.len()),
        match_kind: MatchKind::SortedStringRows,
        pred_exec_time_ms: Some(pred.elapsed_ms),
        gold_exec_time_ms: Some(gold.elapsed_ms),
        scoring_time_ms,
    })
}

/// Converts each row to a tuple of strings (absent values become the
/// literal `"NULL"`), then sorts lexicographically so row order and set
/// membership both normalize away.
fn normalize_rows(rows: &[Vec<Option<String>>]) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.clone().unwrap_or_else(|| "NULL".to_string()))
                .collect()
        })
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_none_with_null_literal() {
        let rows = vec![vec![Some("1".to_string()), None]];
        let normalized = normalize_rows(&rows);
        assert_eq!(normalized, vec![vec!["1".to_string(), "NULL".to_string()]]);
    }

    #[test]
    fn normalize_is_order_insensitive() {
        let a = vec![
            vec![Some("2".to_string())],
            vec![Some("1".to_string())],
        ];
        let b = vec![
            vec![Some("1".to_string())],
            vec![Some("2".to_string())],
        ];
        assert_eq!(normalize_rows(&a), normalize_rows(&b));
    }
}
