//! Layered configuration loading for the benchmark orchestration engine.
//!
//! Ported from the teacher's `mqk-config::load_layered_yaml`: YAML files are
//! merged in order (later files override earlier ones via deep-merge), then
//! canonicalized (object keys sorted recursively) and SHA-256 hashed so a
//! run's persisted `params_json` can be correlated back to the exact
//! configuration that produced it (see spec §6.5).

pub mod secrets;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub use secrets::{resolve_secrets, ResolvedSecrets};

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

impl LoadedConfig {
    /// Deserialize the merged config into the typed `EngineConfig`.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        serde_json::from_value(self.config_json.clone()).context("config does not match EngineConfig shape")
    }
}

fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// EngineConfig — §6.5 of the spec, typed
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub datasets_root: String,
    pub worker_base_url: String,
    pub model_store_dir: String,
    #[serde(default)]
    pub hf_cache_dir: Option<String>,
    /// Defaults to `<datasets_root>/catalog.sqlite` when unset; not named
    /// in the original configuration surface, which passes an already-open
    /// connection instead of a path.
    #[serde(default)]
    pub catalog_db_path: Option<String>,

    #[serde(default = "default_max_repo_size_gb")]
    pub max_repo_size_gb: f64,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_queue_maxsize")]
    pub queue_maxsize: usize,

    #[serde(default = "default_true")]
    pub require_revision: bool,
    #[serde(default = "default_true")]
    pub allow_safetensors_only: bool,
    /// Always forced false regardless of what the file says (§6.5:
    /// `trust_remote_code (forced false)`).
    #[serde(default, skip_serializing)]
    trust_remote_code_raw: bool,

    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_dtype")]
    pub dtype: String,

    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,
    #[serde(default = "default_sandbox_max_rows")]
    pub sandbox_max_rows: usize,
}

impl EngineConfig {
    /// `trust_remote_code` is forced false regardless of configuration.
    pub fn trust_remote_code(&self) -> bool {
        false
    }
}

fn default_max_repo_size_gb() -> f64 {
    30.0
}
fn default_max_new_tokens() -> u32 {
    512
}
fn default_max_prompt_chars() -> usize {
    20_000
}
fn default_queue_maxsize() -> usize {
    100
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_dtype() -> String {
    "auto".to_string()
}
fn default_sandbox_timeout_ms() -> u64 {
    2500
}
fn default_sandbox_max_rows() -> usize {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn deep_merge_overrides_scalars_and_merges_objects() {
        let base = write_tmp("a: 1\nb:\n  c: 2\n  d: 3\n");
        let over = write_tmp("b:\n  c: 99\n");
        let loaded = load_layered_yaml(&[
            base.path().to_str().unwrap(),
            over.path().to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(loaded.config_json["a"], 1);
        assert_eq!(loaded.config_json["b"]["c"], 99);
        assert_eq!(loaded.config_json["b"]["d"], 3);
    }

    #[test]
    fn canonical_hash_is_stable_regardless_of_key_order() {
        let f1 = write_tmp("a: 1\nb: 2\n");
        let f2 = write_tmp("b: 2\na: 1\n");
        let l1 = load_layered_yaml(&[f1.path().to_str().unwrap()]).unwrap();
        let l2 = load_layered_yaml(&[f2.path().to_str().unwrap()]).unwrap();
        assert_eq!(l1.config_hash, l2.config_hash);
    }

    #[test]
    fn trust_remote_code_is_always_forced_false() {
        let f = write_tmp(
            "datasets_root: /data\nworker_base_url: http://x\nmodel_store_dir: /models\ntrust_remote_code_raw: true\n",
        );
        let loaded = load_layered_yaml(&[f.path().to_str().unwrap()]).unwrap();
        let cfg = loaded.engine_config().unwrap();
        assert!(!cfg.trust_remote_code());
    }
}
