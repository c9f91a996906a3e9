//! Shared daemon state: the wired-up core components each HTTP handler
//! needs. Construction is fallible (config load, DB connect + migrate).
//!
//! The Accelerator Runtime and Worker Transport are generic over a
//! backend/transport type in the core crates; this binary fixes them to
//! [`StubGeneratorBackend`] and [`SseWorkerTransport`], the seam a real
//! deployment would swap for a GPU-backed backend.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::sync::mpsc;

use tsql_accelerator::{AcceleratorRuntime, StubGeneratorBackend};
use tsql_admission::{AdmissionController, AdmittedJob};
use tsql_catalog::QuestionCatalog;
use tsql_config::{load_layered_yaml, secrets::resolve_secrets, EngineConfig};
use tsql_coordinator::{Coordinator, SseWorkerTransport};
use tsql_dataset::DatasetLocator;
use tsql_model_store::{ModelStore, ModelStoreConfig};
use tsql_repository::{BenchmarkRepository, PgBenchmarkRepository};
use tsql_sandbox::{Sandbox, SandboxOptions};
use tsql_worker_select::StaticWorkerSelector;

pub struct AppState {
    pub config: EngineConfig,
    pub config_hash: String,
    pub admission: Arc<AdmissionController<StubGeneratorBackend>>,
    pub coordinator: Arc<Coordinator<SseWorkerTransport>>,
    pub accelerator: Arc<AcceleratorRuntime<StubGeneratorBackend>>,
    pub catalog: Arc<QuestionCatalog>,
    started_at: Instant,
}

impl AppState {
    pub async fn new(config_paths: &[&str]) -> anyhow::Result<Self> {
        let loaded = load_layered_yaml(config_paths).context("loading layered configuration")?;
        let config: EngineConfig =
            serde_json::from_value(loaded.config_json).context("parsing merged configuration")?;
        let secrets = resolve_secrets().context("resolving secrets from environment")?;
        let pg_dsn = secrets
            .pg_dsn
            .as_deref()
            .context("PG_DSN resolved as unset despite required-variable check")?;

        let repository: Arc<dyn BenchmarkRepository> = {
            let repo = PgBenchmarkRepository::connect(pg_dsn)
                .await
                .context("connecting to the run repository")?;
            repo.migrate().await.context("running repository migrations")?;
            Arc::new(repo)
        };

        let locator = DatasetLocator::new(config.datasets_root.clone());
        let sandbox = Arc::new(Sandbox::new(locator));
        let sandbox_options = SandboxOptions {
            timeout_ms: config.sandbox_timeout_ms,
            max_rows: config.sandbox_max_rows,
            ..SandboxOptions::default()
        };

        let model_store = Arc::new(
            ModelStore::new(ModelStoreConfig {
                model_store_dir: config.model_store_dir.clone().into(),
                hf_cache_dir: config.hf_cache_dir.clone().map(Into::into),
                max_repo_size_gb: config.max_repo_size_gb,
                allow_safetensors_only: config.allow_safetensors_only,
            })
            .context("constructing the model store")?,
        );

        let accelerator = Arc::new(AcceleratorRuntime::new(Arc::new(StubGeneratorBackend::default())));

        let (admission, admitted_rx) = AdmissionController::new(
            Arc::clone(&model_store),
            Arc::clone(&accelerator),
            config.require_revision,
            config.queue_maxsize,
        );
        let admission = Arc::new(admission);
        spawn_admission_drain(admitted_rx);

        let worker_selector = Arc::new(StaticWorkerSelector::new(config.worker_base_url.clone()));
        let transport = Arc::new(SseWorkerTransport::default());
        let coordinator = Arc::new(Coordinator::new(
            transport,
            worker_selector,
            Arc::clone(&repository),
            Arc::clone(&sandbox),
            sandbox_options,
        ));

        let catalog_path = config
            .catalog_db_path
            .clone()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::Path::new(&config.datasets_root).join("catalog.sqlite"));
        let catalog = Arc::new(QuestionCatalog::open(&catalog_path).context("opening the question catalog")?);

        Ok(Self {
            config,
            config_hash: loaded.config_hash,
            admission,
            coordinator,
            accelerator,
            catalog,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// The Admission Controller's bounded channel is the concurrency gate
/// (`try_send` fails once `queue_maxsize` jobs are outstanding); this task
/// is its sole consumer, draining admitted jobs so the gate keeps moving.
/// The resolved job is handed back to the admitting caller directly, so
/// nothing further needs to happen with the drained value here besides
/// freeing the slot.
fn spawn_admission_drain(mut rx: mpsc::Receiver<AdmittedJob>) {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            tracing::debug!(model = %job.model_ref.identifier, db_id = %job.db_id, "admission slot freed");
        }
    });
}

pub type SharedState = Arc<AppState>;
