//! Accelerator Runtime: single-slot loaded-model holder keyed by
//! `(identifier, revision, precision)`. Evicts the prior resident before
//! loading a new one; at most one `ResidentModel` exists at any instant.
//!
//! The actual decode step is delegated to a pluggable `GeneratorBackend`,
//! the same shape as an adapter trait generic over a swappable downstream
//! collaborator: the shipped backends are a deterministic stub for tests
//! and a tokenizer-only backend for prompt-length accounting; production
//! deployments wire a real accelerator backend behind the same trait
//! without touching this crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tsql_schemas::{DeviceStats, ModelRef, Precision};

#[derive(Debug, Error)]
pub enum AcceleratorError {
    #[error("backend load failed: {0}")]
    LoadFailed(String),
    #[error("backend generation failed: {0}")]
    GenerateFailed(String),
    #[error("tokenizer load failed: {0}")]
    TokenizerFailed(String),
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub do_sample: bool,
}

#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub raw_answer: String,
    pub new_tokens: u32,
}

/// Generic generation backend, parameterizing the accelerator the same way
/// a broker adapter parameterizes an order router: swap the backend, keep
/// the single-slot lifecycle logic untouched.
#[async_trait]
pub trait GeneratorBackend: Send + Sync {
    async fn load(&self, path: &Path, precision: Precision) -> Result<(), AcceleratorError>;
    async fn generate(&self, req: &GenerationRequest) -> Result<GeneratedText, AcceleratorError>;
    async fn unload(&self);
    fn stats(&self) -> Option<DeviceStats>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResidentKey {
    identifier: String,
    revision: String,
    precision: Precision,
}

pub struct AcceleratorRuntime<B: GeneratorBackend> {
    backend: Arc<B>,
    resident: Mutex<Option<ResidentKey>>,
}

impl<B: GeneratorBackend> AcceleratorRuntime<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            resident: Mutex::new(None),
        }
    }

    /// No-op if the requested key already matches the resident model.
    /// Otherwise releases the current resident (if any) before loading.
    pub async fn ensure_loaded(
        &self,
        model_ref: &ModelRef,
        path: &Path,
    ) -> Result<(), AcceleratorError> {
        let key = ResidentKey {
            identifier: model_ref.identifier.clone(),
            revision: model_ref.revision.clone(),
            precision: model_ref.precision,
        };

        let mut guard = self.resident.lock().await;
        if guard.as_ref() == Some(&key) {
            return Ok(());
        }

        self.backend.unload().await;
        *guard = None;

        self.backend.load(path, model_ref.precision).await?;
        *guard = Some(key);
        Ok(())
    }

    /// Guarantees device memory is reclaimed before returning.
    pub async fn release(&self) {
        let mut guard = self.resident.lock().await;
        self.backend.unload().await;
        *guard = None;
    }

    pub fn stats(&self) -> Option<DeviceStats> {
        self.backend.stats()
    }

    pub async fn generate(
        &self,
        req: &GenerationRequest,
    ) -> Result<GeneratedText, AcceleratorError> {
        self.backend.generate(req).await
    }

    pub async fn is_resident(&self, model_ref: &ModelRef) -> bool {
        let key = ResidentKey {
            identifier: model_ref.identifier.clone(),
            revision: model_ref.revision.clone(),
            precision: model_ref.precision,
        };
        self.resident.lock().await.as_ref() == Some(&key)
    }
}

/// Deterministic, CPU-only backend used by tests and `tsql-testkit`.
/// Returns a fixed-shape SQL answer derived from the prompt length so
/// scenario tests can assert on stable output without a real model.
pub struct StubGeneratorBackend {
    loaded_path: Mutex<Option<PathBuf>>,
}

impl Default for StubGeneratorBackend {
    fn default() -> Self {
        Self {
            loaded_path: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GeneratorBackend for StubGeneratorBackend {
    async fn load(&self, path: &Path, _precision: Precision) -> Result<(), AcceleratorError> {
        *self.loaded_path.lock().await = Some(path.to_path_buf());
        Ok(())
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<GeneratedText, AcceleratorError> {
        let sql = extract_select_hint(&req.prompt);
        Ok(GeneratedText {
            raw_answer: sql.clone(),
            new_tokens: sql.split_whitespace().count() as u32,
        })
    }

    async fn unload(&self) {
        *self.loaded_path.lock().await = None;
    }

    fn stats(&self) -> Option<DeviceStats> {
        None
    }
}

/// A trivial deterministic heuristic: if the prompt mentions a table name
/// after "Tables:", emit `SELECT * FROM <table>;`. Good enough for fixed
/// test fixtures; never used outside `tsql-testkit`/test scenarios.
fn extract_select_hint(prompt: &str) -> String {
    for line in prompt.lines() {
        if let Some(rest) = line.strip_prefix("- ") {
            if let Some(paren) = rest.find('(') {
                let table = &rest[..paren];
                return format!("SELECT * FROM {table};");
            }
        }
    }
    "SELECT 1;".to_string()
}

/// Loads a real tokenizer from the local model directory for prompt-length
/// accounting, delegating the decode step itself to an injected backend.
pub struct TokenizerOnlyBackend<B: GeneratorBackend> {
    inner: B,
    tokenizer: Mutex<Option<tokenizers::Tokenizer>>,
}

impl<B: GeneratorBackend> TokenizerOnlyBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            tokenizer: Mutex::new(None),
        }
    }

    pub async fn token_count(&self, text: &str) -> Option<usize> {
        let guard = self.tokenizer.lock().await;
        guard
            .as_ref()
            .and_then(|t| t.encode(text, false).ok())
            .map(|enc| enc.len())
    }
}

#[async_trait]
impl<B: GeneratorBackend> GeneratorBackend for TokenizerOnlyBackend<B> {
    async fn load(&self, path: &Path, precision: Precision) -> Result<(), AcceleratorError> {
        let tokenizer_path = path.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| AcceleratorError::TokenizerFailed(e.to_string()))?;
        *self.tokenizer.lock().await = Some(tokenizer);
        self.inner.load(path, precision).await
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<GeneratedText, AcceleratorError> {
        self.inner.generate(req).await
    }

    async fn unload(&self) {
        *self.tokenizer.lock().await = None;
        self.inner.unload().await;
    }

    fn stats(&self) -> Option<DeviceStats> {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_ref(rev: &str) -> ModelRef {
        ModelRef::new("defog/sqlcoder-7b-2", rev, Precision::Auto)
    }

    #[tokio::test]
    async fn ensure_loaded_is_idempotent_on_matching_key() {
        let runtime = AcceleratorRuntime::new(Arc::new(StubGeneratorBackend::default()));
        let path = Path::new("/tmp/model");
        runtime.ensure_loaded(&model_ref("rev1"), path).await.unwrap();
        assert!(runtime.is_resident(&model_ref("rev1")).await);
        runtime.ensure_loaded(&model_ref("rev1"), path).await.unwrap();
        assert!(runtime.is_resident(&model_ref("rev1")).await);
    }

    #[tokio::test]
    async fn ensure_loaded_switches_key_releasing_the_prior_resident() {
        let runtime = AcceleratorRuntime::new(Arc::new(StubGeneratorBackend::default()));
        let path = Path::new("/tmp/model");
        runtime.ensure_loaded(&model_ref("rev1"), path).await.unwrap();
        runtime.ensure_loaded(&model_ref("rev2"), path).await.unwrap();
        assert!(!runtime.is_resident(&model_ref("rev1")).await);
        assert!(runtime.is_resident(&model_ref("rev2")).await);
    }

    #[tokio::test]
    async fn release_clears_residency() {
        let runtime = AcceleratorRuntime::new(Arc::new(StubGeneratorBackend::default()));
        runtime
            .ensure_loaded(&model_ref("rev1"), Path::new("/tmp/model"))
            .await
            .unwrap();
        runtime.release().await;
        assert!(!runtime.is_resident(&model_ref("rev1")).await);
    }
}
