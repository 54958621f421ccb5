//! Embedding encoder abstraction and implementations.
//!
//! Defines the [`EmbeddingEncoder`] trait and two concrete encoders:
//! - **[`HashingEncoder`]** — deterministic local token-feature-hashing
//!   encoder. No model download, no network; stable across runs, so it is
//!   the default for tests and ephemeral deployments.
//! - **[`OpenAiEncoder`]** — calls an OpenAI-compatible embeddings endpoint
//!   with batching, retry, and exponential backoff.
//!
//! The encoder is chosen once at engine construction via [`create_encoder`];
//! `provider = "disabled"` yields no encoder, which the retrieval layer
//! treats as an absent semantic capability rather than a call-time error.
//!
//! Vector utilities live here too: [`cosine_similarity`], [`l2_normalize`],
//! and the [`vec_to_blob`]/[`blob_to_vec`] pair used for SQLite BLOB storage.
//!
//! # Retry strategy
//!
//! The HTTP encoder retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors → retry
//! - HTTP 401/403/404 → [`EngineError::ModelUnavailable`], no retry
//! - Other 4xx → [`EngineError::Encoding`], no retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// Maps text to fixed-dimension dense vectors, deterministically for a fixed
/// model version. Batching is an internal concern of each implementation.
#[async_trait]
pub trait EmbeddingEncoder: Send + Sync {
    /// Model identifier, recorded in the index snapshot fingerprint.
    fn model_id(&self) -> &str;

    /// Output vector dimensionality.
    fn dims(&self) -> usize;

    /// Encode a batch of texts, one vector per input, preserving order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Encode a query in the same representation space as documents.
    async fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.encode(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Encoding("empty embedding response".into()))
    }
}

/// Create the configured encoder, or `None` when embeddings are disabled.
///
/// This is the engine's one-time capability probe: hybrid retrieval degrades
/// to lexical-only when this returns `None`.
pub fn create_encoder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingEncoder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "hashing" => Ok(Some(Arc::new(HashingEncoder::new(config.dims)))),
        "openai" => Ok(Some(Arc::new(OpenAiEncoder::new(config)?))),
        other => Err(EngineError::ModelUnavailable(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Hashing encoder ============

/// Deterministic token-feature-hashing encoder.
///
/// Each lowercased alphanumeric token is hashed (SHA-256) into a bucket and
/// a sign; token contributions are accumulated and the result L2-normalized.
/// Texts sharing vocabulary therefore land near each other, which is enough
/// for meaningful nearest-neighbor behavior without any model weights.
pub struct HashingEncoder {
    model: String,
    dims: usize,
}

impl HashingEncoder {
    pub fn new(dims: usize) -> Self {
        Self {
            model: format!("feature-hash-{}", dims),
            dims,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();

        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap()) as usize % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            out[bucket] += sign;
        }

        l2_normalize(&mut out);
        out
    }
}

#[async_trait]
impl EmbeddingEncoder for HashingEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI-compatible encoder ============

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// Encoder backed by an OpenAI-compatible `POST /v1/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable; a missing key is a
/// [`EngineError::ModelUnavailable`] at construction, not at call time.
pub struct OpenAiEncoder {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            EngineError::ModelUnavailable("embedding.model required for openai provider".into())
        })?;

        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EngineError::ModelUnavailable("OPENAI_API_KEY environment variable not set".into())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims: config.dims,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingEncoder for OpenAiEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<EngineError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EngineError::Encoding(e.to_string()))?;
                        return parse_embeddings_response(&json);
                    }

                    let status_code = status.as_u16();
                    let body_text = response.text().await.unwrap_or_default();

                    if matches!(status_code, 401 | 403 | 404) {
                        return Err(EngineError::ModelUnavailable(format!(
                            "embeddings endpoint returned {}: {}",
                            status, body_text
                        )));
                    }

                    if status_code == 429 || status.is_server_error() {
                        tracing::debug!(attempt, %status, "retrying embedding batch");
                        last_err = Some(EngineError::Encoding(format!(
                            "embeddings endpoint returned {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(EngineError::Encoding(format!(
                        "embeddings endpoint returned {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(EngineError::Encoding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EngineError::Encoding("embedding failed after retries".into())))
    }
}

/// Extract `data[].embedding` arrays from an embeddings API response,
/// preserving input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::Encoding("invalid response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::Encoding("invalid response: missing embedding".into()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Vector utilities ============

/// Scale a vector to unit L2 norm in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty or
/// mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_encoder_deterministic() {
        let enc = HashingEncoder::new(64);
        let a = enc.encode_query("budget meeting").await.unwrap();
        let b = enc.encode_query("budget meeting").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hashing_encoder_order_preserved() {
        let enc = HashingEncoder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vecs = enc.encode(&texts).await.unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], enc.encode_query("alpha").await.unwrap());
        assert_eq!(vecs[1], enc.encode_query("beta").await.unwrap());
    }

    #[tokio::test]
    async fn test_hashing_overlap_scores_higher() {
        let enc = HashingEncoder::new(128);
        let q = enc.encode_query("budget forecast").await.unwrap();
        let near = enc.encode_query("the budget forecast meeting").await.unwrap();
        let far = enc.encode_query("kayak weather holiday").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn test_create_encoder_disabled() {
        let cfg = EmbeddingConfig {
            provider: "disabled".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_encoder(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut z = vec![0.0, 0.0];
        l2_normalize(&mut z);
        assert_eq!(z, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
