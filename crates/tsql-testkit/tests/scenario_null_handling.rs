//! S4: both predicted and gold rows carry a `NULL` cell. Normalization maps
//! the missing value to the literal `"NULL"` string on both sides, so the
//! comparison still matches.

use std::sync::Arc;

use serde_json::json;

use tsql_coordinator::{new_cancel_signal, Coordinator};
use tsql_repository::BenchmarkRepository;
use tsql_sandbox::{Sandbox, SandboxOptions};
use tsql_schemas::{MatchKind, ModelRef, Precision, RunEvent, RunParams};
use tsql_testkit::{FixtureDataset, InMemoryRepository, StubWorkerTransport};
use tsql_worker_select::StaticWorkerSelector;

const QUERY: &str = "SELECT a, b FROM t;";

#[tokio::test]
async fn null_cells_normalize_equal_on_both_sides() {
    let (_fixture, locator) = FixtureDataset::new(
        "nulls_sqlite",
        "CREATE TABLE t(a INT, b INT);
         INSERT INTO t VALUES (1, NULL);",
    );
    let sandbox = Arc::new(Sandbox::new(locator));
    let repository = Arc::new(InMemoryRepository::new());

    let transport = Arc::new(StubWorkerTransport::scripted(vec![
        StubWorkerTransport::event("status", json!({"phase": "running"})),
        StubWorkerTransport::event(
            "result",
            json!({
                "question_id": "q1",
                "db_id": "nulls_sqlite",
                "raw_answer": QUERY,
                "sql": QUERY,
                "gold_sql": QUERY,
                "gen_time_ms": 4.0,
            }),
        ),
        StubWorkerTransport::event("done", json!({})),
    ]));
    let worker_selector = Arc::new(StaticWorkerSelector::new("http://stub-worker"));

    let coordinator = Coordinator::new(
        transport,
        worker_selector,
        repository.clone() as Arc<dyn BenchmarkRepository>,
        sandbox,
        SandboxOptions::default(),
    );

    let model_ref = ModelRef::new("defog/sqlcoder-7b-2", "rev1", Precision::Auto);
    let cancel = new_cancel_signal();
    let mut events = coordinator
        .stream(model_ref, "nulls_sqlite".to_string(), RunParams::default(), cancel)
        .await
        .unwrap();

    let mut run_id = None;
    while let Some(event) = events.recv().await {
        run_id.get_or_insert_with(|| event.run_id());
        if let RunEvent::Result(payload) = &event {
            let verdict = payload.scoring.as_ref().expect("scoring verdict present");
            assert_eq!(verdict.is_correct, Some(true));
            assert_eq!(verdict.rows_pred, Some(1));
            assert_eq!(verdict.rows_gold, Some(1));
            assert_eq!(verdict.match_kind, MatchKind::SortedStringRows);
        }
    }

    let items = repository.items_for(run_id.unwrap());
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].scoring.as_ref().unwrap().is_correct, Some(true));
}
