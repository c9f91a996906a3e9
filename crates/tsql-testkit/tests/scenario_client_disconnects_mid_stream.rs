//! S5: upstream emits `meta`, two results, then the client goes away
//! before a `done` ever arrives. Exactly two items persist, no terminal
//! event reaches the (now gone) downstream receiver, and the run closes as
//! `client_disconnected`.
//!
//! The worker transport is paced with a `Notify` gate so the test can flip
//! the cancel signal deterministically between the second result and the
//! scripted `done`, rather than racing a burst of buffered sends.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Notify;

use tsql_coordinator::{new_cancel_signal, Coordinator};
use tsql_repository::BenchmarkRepository;
use tsql_sandbox::{Sandbox, SandboxOptions};
use tsql_schemas::{ModelRef, Precision, RunParams};
use tsql_testkit::{FixtureDataset, InMemoryRepository, StubWorkerTransport};
use tsql_worker_select::StaticWorkerSelector;

const QUERY: &str = "SELECT a FROM t;";

#[tokio::test]
async fn client_disconnect_mid_stream_stops_before_done() {
    let (_fixture, locator) = FixtureDataset::new(
        "t_sqlite",
        "CREATE TABLE t(a INT); INSERT INTO t VALUES (1),(2);",
    );
    let sandbox = Arc::new(Sandbox::new(locator));
    let repository = Arc::new(InMemoryRepository::new());

    let gate = Arc::new(Notify::new());
    let result_event = |n: u32| {
        StubWorkerTransport::event(
            "result",
            json!({
                "question_id": format!("q{n}"),
                "db_id": "t_sqlite",
                "raw_answer": QUERY,
                "sql": QUERY,
                "gold_sql": QUERY,
                "gen_time_ms": 3.0,
            }),
        )
    };
    let transport = Arc::new(StubWorkerTransport::scripted_gated(
        vec![
            StubWorkerTransport::event("status", json!({"phase": "running"})),
            result_event(1),
            result_event(2),
            StubWorkerTransport::event("done", json!({})),
        ],
        Arc::clone(&gate),
    ));
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
        .stream(model_ref, "t_sqlite".to_string(), RunParams::default(), cancel.clone())
        .await
        .unwrap();

    let meta = events.recv().await.expect("meta event");
    let run_id = meta.run_id();
    assert_eq!(meta.kind_str(), "meta");

    let status = events.recv().await.expect("status event");
    assert_eq!(status.kind_str(), "status");

    gate.notify_one();
    let result1 = events.recv().await.expect("first result event");
    assert_eq!(result1.kind_str(), "result");

    gate.notify_one();
    let result2 = events.recv().await.expect("second result event");
    assert_eq!(result2.kind_str(), "result");

    // The client has now seen both results and walks away: flip the
    // cancel signal before letting the scripted `done` through.
    cancel.store(true, Ordering::SeqCst);
    gate.notify_one();

    while let Some(event) = events.recv().await {
        panic!("no further downstream events expected, got {:?}", event.kind_str());
    }

    let items = repository.items_for(run_id);
    assert_eq!(items.len(), 2);

    let runs = repository.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status.as_deref(), Some("client_disconnected"));

    let logged_kinds: Vec<String> = repository
        .events_for(run_id)
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert!(!logged_kinds.contains(&"done".to_string()));
    assert!(!logged_kinds.contains(&"error".to_string()));
}
