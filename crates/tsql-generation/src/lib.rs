//! Generation Runner: builds the prompt, performs one warm-up pass, then
//! generates for a single question and reports per-call metrics.

pub mod metrics;

use std::time::Instant;

use sysinfo::{Pid, System};
use thiserror::Error;
use tsql_accelerator::{AcceleratorError, AcceleratorRuntime, GenerationRequest, GeneratorBackend};
use tsql_schemas::{DeviceStats, GenerationMetrics, RunParams};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Accelerator(#[from] AcceleratorError),
}

/// Byte-exact prompt template (see the external interface contract).
pub fn build_prompt(schema: &str, question: &str) -> String {
    format!(
        "You are a SQL generation engine.\n\n\
         You MUST output a single valid SQL query.\n\
         Do NOT output explanations, comments, notes, or markdown.\n\
         Do NOT repeat the question.\n\
         Do NOT add any text before or after the SQL.\n\n\
         Rules:\n\
         - Use ONLY the tables and columns present in the schema.\n\
         - If aggregation per group is requested, you MUST use GROUP BY.\n\
         - If the question asks \"par X\", you MUST include X in SELECT and GROUP BY.\n\
         - The output must be executable as-is.\n\n\
         DATABASE SCHEMA:\n\
         {schema}\n\n\
         QUESTION:\n\
         {question}\n\n\
         SQL QUERY:\n"
    )
}

/// Strips the prompt prefix if the decoded completion still carries it,
/// then returns the substring up to and including the first `;`. Returns
/// the completion unchanged if no `;` is present. Idempotent:
/// `extract_sql(extract_sql(x)) == extract_sql(x)`.
pub fn extract_sql(decoded: &str, prompt: &str) -> String {
    let completion = decoded
        .strip_prefix(prompt)
        .unwrap_or(decoded)
        .trim();
    match completion.find(';') {
        Some(idx) => format!("{};", completion[..idx].trim()),
        None => completion.to_string(),
    }
}

pub struct GenerationRunner {
    max_prompt_chars: usize,
    max_new_tokens_cap: u32,
}

pub struct RunOnceOutput {
    pub raw_answer: String,
    pub sql: String,
    pub metrics: GenerationMetrics,
}

impl GenerationRunner {
    pub fn new(max_prompt_chars: usize, max_new_tokens_cap: u32) -> Self {
        Self {
            max_prompt_chars,
            max_new_tokens_cap,
        }
    }

    fn truncated_prompt(&self, schema: &str, question: &str) -> String {
        let prompt = build_prompt(schema, question);
        if prompt.chars().count() > self.max_prompt_chars {
            prompt.chars().take(self.max_prompt_chars).collect()
        } else {
            prompt
        }
    }

    /// One small-token generation to stabilize kernels; greedy, 16 tokens.
    pub async fn warm_up<B: GeneratorBackend>(
        &self,
        accelerator: &AcceleratorRuntime<B>,
        schema: &str,
        question: &str,
    ) -> Result<(), GenerationError> {
        let prompt = self.truncated_prompt(schema, question);
        accelerator
            .generate(&GenerationRequest {
                prompt,
                max_new_tokens: 16,
                temperature: 0.0,
                top_p: 1.0,
                do_sample: false,
            })
            .await?;
        Ok(())
    }

    pub async fn run_once<B: GeneratorBackend>(
        &self,
        accelerator: &AcceleratorRuntime<B>,
        schema: &str,
        question: &str,
        params: &RunParams,
    ) -> Result<RunOnceOutput, GenerationError> {
        let prompt = self.truncated_prompt(schema, question);
        let max_new = params.max_new_tokens.clamp(1, self.max_new_tokens_cap);

        let mut sys = System::new_all();
        let pid = Pid::from_u32(std::process::id());
        sys.refresh_process(pid);
        let start_mem_mb = sys
            .process(pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        let call_start = Instant::now();
        let gen_start = Instant::now();

        let generated = accelerator
            .generate(&GenerationRequest {
                prompt: prompt.clone(),
                max_new_tokens: max_new,
                temperature: params.temperature,
                top_p: params.top_p,
                do_sample: params.do_sample,
            })
            .await?;

        let gen_time_ms = gen_start.elapsed().as_secs_f64() * 1000.0;
        let exec_time_ms = call_start.elapsed().as_secs_f64() * 1000.0;

        sys.refresh_process(pid);
        let end_mem_mb = sys
            .process(pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        sys.refresh_cpu_usage();
        let cpu_percent = sys.global_cpu_usage();

        let raw_answer = generated.raw_answer.clone();
        let sql = extract_sql(&generated.raw_answer, &prompt);
        let gen_s = (gen_time_ms / 1000.0).max(1e-9);
        let tokens_per_s = generated.new_tokens as f64 / gen_s;

        let device: Option<DeviceStats> = accelerator.stats();

        Ok(RunOnceOutput {
            raw_answer,
            sql,
            metrics: GenerationMetrics {
                gen_time_ms,
                exec_time_ms,
                new_tokens: generated.new_tokens,
                tokens_per_s,
                ram_delta_mb: end_mem_mb - start_mem_mb,
                cpu_percent,
                device,
            },
        })
    }
}
