//! S2: predicted SQL fails to parse while gold executes fine. Verdict is
//! `unknown` via `exec_failed`, the run still ends `ok` (a bad prediction
//! is data, not a stream failure).

use std::sync::Arc;

use serde_json::json;

use tsql_coordinator::{new_cancel_signal, Coordinator};
use tsql_repository::BenchmarkRepository;
use tsql_sandbox::{Sandbox, SandboxOptions};
use tsql_schemas::{MatchKind, ModelRef, Precision, RunEvent, RunParams};
use tsql_testkit::{FixtureDataset, InMemoryRepository, StubWorkerTransport};
use tsql_worker_select::StaticWorkerSelector;

#[tokio::test]
async fn predicted_sql_syntax_error_scores_as_unknown() {
    let (_fixture, locator) = FixtureDataset::new(
        "shop_sqlite",
        "CREATE TABLE orders(order_id INT, customer_id INT);
         INSERT INTO orders VALUES (10,1),(11,1);",
    );
    let sandbox = Arc::new(Sandbox::new(locator));
    let repository = Arc::new(InMemoryRepository::new());

    let transport = Arc::new(StubWorkerTransport::scripted(vec![
        StubWorkerTransport::event("status", json!({"phase": "running"})),
        StubWorkerTransport::event(
            "result",
            json!({
                "question_id": "q1",
                "db_id": "shop_sqlite",
                "raw_answer": "SELEC * FRM orders;",
                "sql": "SELEC * FRM orders;",
                "gold_sql": "SELECT * FROM orders;",
                "gen_time_ms": 8.0,
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
        .stream(model_ref, "shop_sqlite".to_string(), RunParams::default(), cancel)
        .await
        .unwrap();

    let mut run_id = None;
    let mut saw_result = false;
    while let Some(event) = events.recv().await {
        run_id.get_or_insert_with(|| event.run_id());
        if let RunEvent::Result(payload) = &event {
            saw_result = true;
            let verdict = payload.scoring.as_ref().expect("scoring verdict present");
            assert!(!verdict.pred_exec_success);
            assert!(verdict.gold_exec_success);
            assert_eq!(verdict.is_correct, None);
            assert!(verdict.pred_error.is_some());
            assert_eq!(verdict.match_kind, MatchKind::ExecFailed);
        }
        if let RunEvent::Done(payload) = &event {
            assert_eq!(payload.status, "ok");
        }
    }
    assert!(saw_result);

    let run_id = run_id.unwrap();
    let items = repository.items_for(run_id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].scoring.as_ref().unwrap().is_correct, None);
    assert_eq!(repository.runs()[0].status.as_deref(), Some("ok"));
}
