//! S6: two sequential runs target different model references on the same
//! accelerator runtime. At no instant are two residents alive: the
//! recorded call trace shows exactly one `release` (via the implicit
//! unload inside `ensure_loaded`) between the two `load`s, and the second
//! run's first generation is preceded by its own warm-up pass.
//!
//! Exercises `AcceleratorRuntime`/`GenerationRunner` directly; wiring a
//! fresh `ModelStore` resolution per run needs live Hugging Face Hub
//! access that has no place in a scenario test.

use std::path::Path;
use std::sync::Arc;

use tsql_accelerator::AcceleratorRuntime;
use tsql_generation::GenerationRunner;
use tsql_schemas::{ModelRef, Precision, RunParams};
use tsql_testkit::{Call, RecordingGeneratorBackend};

#[tokio::test]
async fn switching_models_releases_before_loading_and_warms_up_again() {
    let backend = Arc::new(RecordingGeneratorBackend::new());
    let accelerator = AcceleratorRuntime::new(Arc::clone(&backend));
    let runner = GenerationRunner::new(8_000, 256);

    let model_a = ModelRef::new("defog/sqlcoder-7b-2", "rev-a", Precision::Auto);
    let model_b = ModelRef::new("defog/sqlcoder-7b-2", "rev-b", Precision::Auto);
    let path_a = Path::new("/models/sqlcoder/rev-a");
    let path_b = Path::new("/models/sqlcoder/rev-b");

    let schema = "Tables:\n- orders(order_id, customer_id)";
    let question = "how many orders per customer?";
    let params = RunParams::default();

    accelerator.ensure_loaded(&model_a, path_a).await.unwrap();
    runner.warm_up(&accelerator, schema, question).await.unwrap();
    runner.run_once(&accelerator, schema, question, &params).await.unwrap();
    assert!(accelerator.is_resident(&model_a).await);

    accelerator.ensure_loaded(&model_b, path_b).await.unwrap();
    assert!(!accelerator.is_resident(&model_a).await);
    assert!(accelerator.is_resident(&model_b).await);
    runner.warm_up(&accelerator, schema, question).await.unwrap();
    runner.run_once(&accelerator, schema, question, &params).await.unwrap();

    let calls = backend.calls();

    // Exactly one `Unload` and it falls strictly between the two `Load`s:
    // never two residents alive at once.
    let unload_count = calls.iter().filter(|c| matches!(c, Call::Unload)).count();
    assert_eq!(unload_count, 1);

    let first_load = calls
        .iter()
        .position(|c| matches!(c, Call::Load(p, _) if p.as_path() == path_a));
    let unload_at = calls.iter().position(|c| matches!(c, Call::Unload));
    let second_load = calls
        .iter()
        .position(|c| matches!(c, Call::Load(p, _) if p.as_path() == path_b));
    let (first_load, unload_at, second_load) = (
        first_load.expect("first load recorded"),
        unload_at.expect("unload recorded"),
        second_load.expect("second load recorded"),
    );
    assert!(first_load < unload_at);
    assert!(unload_at < second_load);

    // Each model's session starts with a 16-token warm-up generate call
    // before its real run-once generate call.
    let generate_token_counts: Vec<u32> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Generate(tokens) => Some(*tokens),
            _ => None,
        })
        .collect();
    assert_eq!(generate_token_counts.len(), 4);
    assert_eq!(generate_token_counts[0], 16);
    assert_eq!(generate_token_counts[2], 16);
}
