//! A `GeneratorBackend` that records every call it receives instead of
//! doing any real work, so accelerator-switch scenarios can assert on
//! call order without a GPU.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use tsql_accelerator::{AcceleratorError, GeneratedText, GenerationRequest, GeneratorBackend};
use tsql_schemas::Precision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load(PathBuf, Precision),
    Generate(u32),
    Unload,
}

#[derive(Default)]
pub struct RecordingGeneratorBackend {
    calls: Mutex<Vec<Call>>,
}

impl RecordingGeneratorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeneratorBackend for RecordingGeneratorBackend {
    async fn load(&self, path: &Path, precision: Precision) -> Result<(), AcceleratorError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Load(path.to_path_buf(), precision));
        Ok(())
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<GeneratedText, AcceleratorError> {
        self.calls.lock().unwrap().push(Call::Generate(req.max_new_tokens));
        Ok(GeneratedText {
            raw_answer: "SELECT 1;".to_string(),
            new_tokens: 3,
        })
    }

    async fn unload(&self) {
        self.calls.lock().unwrap().push(Call::Unload);
    }

    fn stats(&self) -> Option<tsql_schemas::DeviceStats> {
        None
    }
}
