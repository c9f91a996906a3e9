//! `tsql run start` — wires the same components the daemon wires, for a
//! single one-shot run driven straight from the terminal. Each downstream
//! event is printed to stdout as one JSON line as it arrives.

use std::sync::Arc;

use anyhow::{Context, Result};

use tsql_accelerator::{AcceleratorRuntime, StubGeneratorBackend};
use tsql_admission::{AdmissionController, AdmissionRequest};
use tsql_config::{load_layered_yaml, secrets::resolve_secrets, EngineConfig};
use tsql_coordinator::{new_cancel_signal, Coordinator, SseWorkerTransport};
use tsql_dataset::DatasetLocator;
use tsql_model_store::{ModelStore, ModelStoreConfig};
use tsql_repository::{BenchmarkRepository, PgBenchmarkRepository};
use tsql_sandbox::{Sandbox, SandboxOptions};
use tsql_schemas::{Precision, RunParams};
use tsql_worker_select::StaticWorkerSelector;

#[allow(clippy::too_many_arguments)]
pub async fn run_start(
    model: String,
    revision: Option<String>,
    db_id: String,
    limit: u32,
    offset: u32,
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    do_sample: bool,
    dtype: String,
    config_paths: Vec<String>,
) -> Result<()> {
    let path_refs: Vec<&str> = config_paths.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&path_refs)?;
    let config: EngineConfig =
        serde_json::from_value(loaded.config_json).context("parsing merged configuration")?;
    let secrets = resolve_secrets()?;
    let pg_dsn = secrets.pg_dsn.context("PG_DSN resolved as unset")?;

    let repository: Arc<dyn BenchmarkRepository> = {
        let repo = PgBenchmarkRepository::connect(&pg_dsn).await?;
        Arc::new(repo)
    };

    let locator = DatasetLocator::new(config.datasets_root.clone());
    let sandbox = Arc::new(Sandbox::new(locator));
    let sandbox_options = SandboxOptions {
        timeout_ms: config.sandbox_timeout_ms,
        max_rows: config.sandbox_max_rows,
        ..SandboxOptions::default()
    };

    let model_store = Arc::new(ModelStore::new(ModelStoreConfig {
        model_store_dir: config.model_store_dir.clone().into(),
        hf_cache_dir: config.hf_cache_dir.clone().map(Into::into),
        max_repo_size_gb: config.max_repo_size_gb,
        allow_safetensors_only: config.allow_safetensors_only,
    })?);

    let accelerator = Arc::new(AcceleratorRuntime::new(Arc::new(StubGeneratorBackend::default())));

    let (admission, mut admitted_rx) = AdmissionController::new(
        Arc::clone(&model_store),
        Arc::clone(&accelerator),
        config.require_revision,
        config.queue_maxsize,
    );

    let worker_selector = Arc::new(StaticWorkerSelector::new(config.worker_base_url.clone()));
    let transport = Arc::new(SseWorkerTransport::default());
    let coordinator = Coordinator::new(
        transport,
        worker_selector,
        Arc::clone(&repository),
        Arc::clone(&sandbox),
        sandbox_options,
    );

    let precision = parse_precision(&dtype)?;
    let req = AdmissionRequest {
        model,
        revision,
        db_id,
        limit,
        offset,
        dtype: precision,
        params: RunParams {
            limit,
            offset,
            max_new_tokens,
            temperature,
            top_p,
            do_sample,
        },
    };

    tracing::info!(model = %req.model, db_id = %req.db_id, "admitting benchmark run");
    let job = admission.admit(req).await?;
    // Nothing else drains the queue outside the daemon's background task;
    // a one-shot CLI run is its own sole consumer.
    let _ = admitted_rx.try_recv();

    let cancel = new_cancel_signal();
    let mut events = coordinator
        .stream(job.model_ref, job.db_id, job.params, cancel)
        .await?;

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if matches!(event, tsql_schemas::RunEvent::Done(_) | tsql_schemas::RunEvent::Error(_)) {
            break;
        }
    }

    Ok(())
}

fn parse_precision(s: &str) -> Result<Precision> {
    match s.to_lowercase().as_str() {
        "half" => Ok(Precision::Half),
        "bfloat" => Ok(Precision::Bfloat),
        "single" => Ok(Precision::Single),
        "auto" => Ok(Precision::Auto),
        other => anyhow::bail!("invalid --dtype '{other}'. expected one of: auto | half | bfloat | single"),
    }
}
