use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding one snapshot subdirectory per corpus fingerprint.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Pull splits back to the last whitespace instead of cutting mid-word.
    #[serde(default = "default_true")]
    pub align_whitespace: bool,
    /// Index subjects as their own chunk kind.
    #[serde(default = "default_true")]
    pub index_subject: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            align_whitespace: true,
            index_subject: true,
        }
    }
}

fn default_max_chars() -> usize {
    512
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hashing"`, `"openai"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Endpoint for OpenAI-compatible backends.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            endpoint: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of lexical candidates fetched before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
    /// Number of vector candidates fetched before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    /// Reciprocal-rank-fusion constant. 60 per Cormack et al. (SIGIR 2009).
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k_lexical: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            rrf_k: default_rrf_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_candidate_k() -> usize {
    40
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_final_limit() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// Maximum candidates rendered into the answer context block.
    #[serde(default = "default_max_context")]
    pub max_context: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            max_context: default_max_context(),
        }
    }
}

fn default_max_context() -> usize {
    3
}

impl Config {
    /// A usable in-memory default rooted at `dir`, for tests and ephemeral
    /// deployments that never touch a config file.
    pub fn with_index_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig { dir: dir.into() },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            answer: AnswerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, or openai.",
            other
        ),
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::with_index_dir("/tmp/idx");
        assert_eq!(cfg.chunking.max_chars, 512);
        assert_eq!(cfg.embedding.provider, "hashing");
        assert_eq!(cfg.retrieval.rrf_k, 60.0);
        assert_eq!(cfg.answer.max_context, 3);
    }

    #[test]
    fn test_load_rejects_bad_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maildex.toml");
        std::fs::write(
            &path,
            "[index]\ndir = \"idx\"\n\n[embedding]\nprovider = \"quantum\"\n",
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_load_minimal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maildex.toml");
        std::fs::write(&path, "[index]\ndir = \"idx\"\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.max_chars, 512);
        assert!(cfg.embedding.is_enabled());
    }
}
