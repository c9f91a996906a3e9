//! Model Store: content-addressed local cache of model artifacts keyed by
//! `(identifier, revision)`. Enforces size, file-type, and revision policy,
//! then emits a readiness marker written last, atomically.

use std::path::{Path, PathBuf};

use hf_hub::api::tokio::{Api, ApiError};
use regex::Regex;
use thiserror::Error;
use tsql_schemas::ModelRef;

const READY_MARKER: &str = ".READY";

/// File-type allow-list, ported verbatim from the Python original's
/// `allow_patterns`. `.bin` is appended only when `allow_safetensors_only`
/// is false; these four are always excluded regardless of policy.
const ALWAYS_IGNORED_SUFFIXES: &[&str] = &[".msgpack", ".h5", ".ot", ".ckpt"];

#[derive(Debug, Error)]
pub enum ModelStoreError {
    #[error("model repo too large ({actual_gb:.2} GB) > limit {limit_gb:.2} GB")]
    TooLarge { actual_gb: f64, limit_gb: f64 },
    #[error("model repo has no .safetensors weights (policy allow_safetensors_only=true)")]
    UnsupportedArtifact,
    #[error("forbidden revision: {0}")]
    ForbiddenRevision(String),
    #[error("remote metadata unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("local io error: {0}")]
    LocalIoError(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ModelStoreConfig {
    pub model_store_dir: PathBuf,
    pub hf_cache_dir: Option<PathBuf>,
    pub max_repo_size_gb: f64,
    pub allow_safetensors_only: bool,
}

pub struct ModelStore {
    config: ModelStoreConfig,
    api: Api,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct ReadyModel {
    pub model_id: String,
    pub revision: String,
    pub path: PathBuf,
}

struct RemoteFile {
    rfilename: String,
    size: Option<u64>,
}

impl ModelStore {
    pub fn new(config: ModelStoreConfig) -> Result<Self, ModelStoreError> {
        let mut builder = hf_hub::api::tokio::ApiBuilder::new();
        if let Some(cache_dir) = &config.hf_cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| ModelStoreError::RemoteUnavailable(e.to_string()))?;
        Ok(Self {
            config,
            api,
            http: reqwest::Client::new(),
        })
    }

    fn local_dir(&self, model_ref: &ModelRef) -> PathBuf {
        let (safe_id, revision) = model_ref.store_key();
        self.config.model_store_dir.join(safe_id).join(revision)
    }

    pub fn is_on_nvme(&self, model_ref: &ModelRef) -> bool {
        self.local_dir(model_ref).join(READY_MARKER).exists()
    }

    /// Idempotent: a second call with the `.READY` marker already in place
    /// is a no-op that returns the existing directory immediately.
    pub async fn ensure_local(&self, model_ref: &ModelRef) -> Result<PathBuf, ModelStoreError> {
        let dst = self.local_dir(model_ref);
        if dst.join(READY_MARKER).exists() {
            return Ok(dst);
        }

        let repo = self.api.model(model_ref.identifier.clone());
        let files = remote_file_list(&repo, &self.http, &model_ref.identifier, &model_ref.revision).await?;

        let size_gb = repo_size_gb(&files);
        if size_gb > self.config.max_repo_size_gb {
            return Err(ModelStoreError::TooLarge {
                actual_gb: size_gb,
                limit_gb: self.config.max_repo_size_gb,
            });
        }
        if self.config.allow_safetensors_only && !has_safetensors(&files) {
            return Err(ModelStoreError::UnsupportedArtifact);
        }

        std::fs::create_dir_all(&dst)?;

        for file in &files {
            if !is_allowed(&file.rfilename, self.config.allow_safetensors_only) {
                continue;
            }
            let cached = repo
                .get(&file.rfilename)
                .await
                .map_err(|e| ModelStoreError::RemoteUnavailable(e.to_string()))?;
            let target = dst.join(&file.rfilename);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&cached, &target)?;
        }

        write_marker_atomically(&dst)?;
        Ok(dst)
    }

    pub fn list_ready(&self) -> Vec<ReadyModel> {
        let mut out = Vec::new();
        let Ok(model_dirs) = std::fs::read_dir(&self.config.model_store_dir) else {
            return out;
        };
        for model_dir in model_dirs.flatten() {
            let model_path = model_dir.path();
            if !model_path.is_dir() {
                continue;
            }
            let model_id = model_dir.file_name().to_string_lossy().replace("__", "/");
            let Ok(revisions) = std::fs::read_dir(&model_path) else {
                continue;
            };
            for revision_dir in revisions.flatten() {
                let rev_path = revision_dir.path();
                if rev_path.is_dir() && rev_path.join(READY_MARKER).exists() {
                    out.push(ReadyModel {
                        model_id: model_id.clone(),
                        revision: revision_dir.file_name().to_string_lossy().to_string(),
                        path: rev_path,
                    });
                }
            }
        }
        out
    }
}

/// Lists the repo's siblings and resolves each one's real size with a HEAD
/// request against its `resolve` URL, mirroring `hf_policy.repo_size_gb`'s
/// reliance on real sibling sizes rather than the bare filename listing
/// `ApiRepo::info` returns on its own.
async fn remote_file_list(
    repo: &hf_hub::api::tokio::ApiRepo,
    http: &reqwest::Client,
    identifier: &str,
    revision: &str,
) -> Result<Vec<RemoteFile>, ModelStoreError> {
    let info = repo
        .info()
        .await
        .map_err(|e: ApiError| ModelStoreError::RemoteUnavailable(e.to_string()))?;

    let mut files = Vec::with_capacity(info.siblings.len());
    for s in info.siblings {
        let size = head_content_length(http, identifier, revision, &s.rfilename).await;
        files.push(RemoteFile {
            rfilename: s.rfilename,
            size,
        });
    }
    Ok(files)
}

/// `None` on any network/parsing failure — a missing size degrades the
/// total to an undercount rather than failing the whole listing.
async fn head_content_length(
    http: &reqwest::Client,
    identifier: &str,
    revision: &str,
    rfilename: &str,
) -> Option<u64> {
    let url = format!("https://huggingface.co/{identifier}/resolve/{revision}/{rfilename}");
    let resp = http.head(&url).send().await.ok()?;
    resp.headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn repo_size_gb(files: &[RemoteFile]) -> f64 {
    let total: u64 = files.iter().filter_map(|f| f.size).sum();
    total as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn has_safetensors(files: &[RemoteFile]) -> bool {
    files.iter().any(|f| f.rfilename.ends_with(".safetensors"))
}

fn is_allowed(filename: &str, safetensors_only: bool) -> bool {
    if ALWAYS_IGNORED_SUFFIXES.iter().any(|suf| filename.ends_with(suf)) {
        return false;
    }
    let allowed_exact = [
        "tokenizer_config.json",
        "generation_config.json",
        "config.json",
        "added_tokens.json",
        "special_tokens_map.json",
        "spiece.model",
        "merges.txt",
    ];
    if allowed_exact.contains(&filename) {
        return true;
    }
    if filename.ends_with(".safetensors")
        || filename.starts_with("tokenizer.")
        || filename.starts_with("vocab.")
        || filename.ends_with(".model")
        || filename.ends_with(".json")
    {
        return true;
    }
    if !safetensors_only && filename.ends_with(".bin") {
        return true;
    }
    false
}

/// Write-to-temp + rename: atomic on the same filesystem, matching the
/// contract's "written last, atomically."
fn write_marker_atomically(dir: &Path) -> Result<(), ModelStoreError> {
    let tmp = dir.join(".READY.tmp");
    std::fs::write(&tmp, b"ok\n")?;
    std::fs::rename(&tmp, dir.join(READY_MARKER))?;
    Ok(())
}

/// `ns/name` vs. huggingface.co URL parsing, with revision inference from
/// `/tree/<rev>` or `/resolve/<rev>/` path segments.
pub fn parse_hf_input(model: &str, revision: Option<&str>) -> Result<(String, Option<String>), ModelStoreError> {
    let model = model.trim();
    let url_re = Regex::new(r"^https?://huggingface\.co/([^/\s]+/[^/\s]+)(?:/.*)?$").unwrap();

    if let Some(caps) = url_re.captures(model) {
        let model_id = caps[1].to_string();
        let mut inferred = None;
        if let Some(m) = Regex::new(r"/tree/([^/\s]+)").unwrap().captures(model) {
            inferred = Some(m[1].to_string());
        }
        if let Some(m) = Regex::new(r"/resolve/([^/\s]+)/").unwrap().captures(model) {
            inferred = Some(m[1].to_string());
        }
        let revision = revision.map(|s| s.to_string()).or(inferred);
        return Ok((model_id, revision));
    }

    if model.contains('/') && !model.contains(' ') {
        return Ok((model.to_string(), revision.map(|s| s.to_string())));
    }

    Err(ModelStoreError::ForbiddenRevision(format!(
        "invalid HF model input: {model}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ns_name() {
        let (id, rev) = parse_hf_input("defog/sqlcoder-7b-2", Some("abc123")).unwrap();
        assert_eq!(id, "defog/sqlcoder-7b-2");
        assert_eq!(rev.as_deref(), Some("abc123"));
    }

    #[test]
    fn infers_revision_from_tree_url() {
        let (id, rev) =
            parse_hf_input("https://huggingface.co/defog/sqlcoder-7b-2/tree/main", None).unwrap();
        assert_eq!(id, "defog/sqlcoder-7b-2");
        assert_eq!(rev.as_deref(), Some("main"));
    }

    #[test]
    fn infers_revision_from_resolve_url() {
        let (id, rev) = parse_hf_input(
            "https://huggingface.co/defog/sqlcoder-7b-2/resolve/v2/config.json",
            None,
        )
        .unwrap();
        assert_eq!(id, "defog/sqlcoder-7b-2");
        assert_eq!(rev.as_deref(), Some("v2"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_hf_input("not a model id", None).is_err());
    }

    #[test]
    fn allow_list_excludes_checkpoint_formats() {
        assert!(!is_allowed("model.ckpt", true));
        assert!(!is_allowed("flax_model.msgpack", true));
        assert!(is_allowed("model.safetensors", true));
        assert!(!is_allowed("pytorch_model.bin", true));
        assert!(is_allowed("pytorch_model.bin", false));
    }
}
