//! Embedding engine abstraction and implementations.
//!
//! Defines the [`Embedder`] capability trait and concrete engines:
//! - **[`HeuristicEmbedder`]** — deterministic hash-derived vectors; no
//!   external process, useful offline and in tests. Low fidelity: similarity
//!   ranges are compressed, so retrieval applies a much smaller cutoff.
//! - **[`SubprocessEmbedder`]** — spawns an external embedder command and
//!   speaks a JSON protocol over stdin/stdout.
//! - **[`HttpEmbedder`]** — calls an Ollama-style `/api/embed` endpoint with
//!   bounded retry and exponential backoff for transient errors.
//!
//! Also provides [`cosine_similarity`], the sole scoring primitive of the
//! retrieval engine.
//!
//! # Failure semantics
//!
//! All engine errors surface as [`CacheError::EmbeddingEngineFailure`].
//! Transport-level retries (HTTP 429/5xx) happen inside the engine; callers
//! never retry, because embeddings are deterministic and a clean failure
//! would recur.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::EmbeddingConfig;
use crate::error::{CacheError, Result};

/// Dimensionality used when the configuration does not pin one.
const DEFAULT_DIMS: usize = 384;

/// How trustworthy an engine's similarity scores are.
///
/// Heuristic engines produce compressed similarity ranges, so the retrieval
/// threshold defaults far lower than for a proper embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    Heuristic,
    Model,
}

impl Fidelity {
    /// Default similarity cutoff applied before ranking.
    pub fn default_threshold(self) -> f32 {
        match self {
            Fidelity::Heuristic => 0.05,
            Fidelity::Model => 0.3,
        }
    }
}

/// Capability trait for embedding engines: text in, fixed-length vectors out.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in cache metadata and sidecars.
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Fidelity class, driving the default similarity threshold.
    fn fidelity(&self) -> Fidelity;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = self.embed_many(&texts).await?;
        vectors.into_iter().next().ok_or_else(|| {
            CacheError::EmbeddingEngineFailure("empty embedding response".to_string())
        })
    }
}

/// Instantiate the engine selected by configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "heuristic" => Ok(Box::new(HeuristicEmbedder::new(config))),
        "subprocess" => Ok(Box::new(SubprocessEmbedder::new(config)?)),
        "http" => Ok(Box::new(HttpEmbedder::new(config)?)),
        other => Err(CacheError::EmbeddingEngineFailure(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Heuristic engine ============

/// Deterministic hash-derived embeddings.
///
/// Each vector is expanded block-wise from the SHA-256 digest of the input
/// text and normalized to unit length. The derivation uses no
/// process-local state, so persisted vectors stay comparable across runs
/// and toolchain versions.
pub struct HeuristicEmbedder {
    model: String,
    dims: usize,
}

impl HeuristicEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "heuristic-sha256".to_string()),
            dims: config.dims.unwrap_or(DEFAULT_DIMS),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let seed = Sha256::digest(text.as_bytes());

        let mut vector = Vec::with_capacity(self.dims);
        let mut block_index: u32 = 0;

        while vector.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block_index.to_le_bytes());
            let block = hasher.finalize();

            for bytes in block.chunks_exact(4) {
                if vector.len() == self.dims {
                    break;
                }
                let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let unit = (word as f64 / u32::MAX as f64) * 2.0 - 1.0;
                vector.push(unit as f32);
            }
            block_index += 1;
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut vector {
                *v /= magnitude;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HeuristicEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn fidelity(&self) -> Fidelity {
        Fidelity::Heuristic
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Subprocess engine ============

/// Spawns an external embedder command per batch.
///
/// Protocol: the command receives `{"texts": ["...", ...]}` on stdin and
/// must print `{"embeddings": [[...], ...], "model": "..."}` on stdout.
/// No timeout is imposed; a hanging engine hangs the query.
pub struct SubprocessEmbedder {
    command: Vec<String>,
    model: String,
    dims: usize,
}

#[derive(Debug, Deserialize)]
struct SubprocessResponse {
    embeddings: Vec<Vec<f32>>,
}

impl SubprocessEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let raw = config.command.clone().ok_or_else(|| {
            CacheError::EmbeddingEngineFailure(
                "embedding.command required for subprocess provider".to_string(),
            )
        })?;
        let command: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if command.is_empty() {
            return Err(CacheError::EmbeddingEngineFailure(
                "embedding.command is empty".to_string(),
            ));
        }

        Ok(Self {
            command,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "all-MiniLM-L6-v2".to_string()),
            dims: config.dims.unwrap_or(DEFAULT_DIMS),
        })
    }
}

#[async_trait]
impl Embedder for SubprocessEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn fidelity(&self) -> Fidelity {
        Fidelity::Model
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({ "texts": texts }).to_string();

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                CacheError::EmbeddingEngineFailure(format!(
                    "failed to spawn embedder '{}': {}",
                    self.command[0], e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await.map_err(|e| {
                CacheError::EmbeddingEngineFailure(format!("failed to write to embedder: {}", e))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            CacheError::EmbeddingEngineFailure(format!("embedder did not complete: {}", e))
        })?;

        if !output.status.success() {
            return Err(CacheError::EmbeddingEngineFailure(format!(
                "embedder exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let response: SubprocessResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| {
                CacheError::EmbeddingEngineFailure(format!("invalid embedder response: {}", e))
            })?;

        if response.embeddings.len() != texts.len() {
            return Err(CacheError::EmbeddingEngineFailure(format!(
                "embedder returned {} vectors for {} texts",
                response.embeddings.len(),
                texts.len()
            )));
        }

        Ok(response.embeddings)
    }
}

// ============ HTTP engine ============

/// Calls an Ollama-style `POST /api/embed` endpoint.
///
/// Retry strategy for transient errors:
/// - HTTP 429 or 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped at 2^5)
/// - other 4xx → fail immediately
/// - network errors → retry
pub struct HttpEmbedder {
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct HttpEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            CacheError::EmbeddingEngineFailure(
                "embedding.model required for http provider".to_string(),
            )
        })?;

        Ok(Self {
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            dims: config.dims.unwrap_or(DEFAULT_DIMS),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn fidelity(&self) -> Fidelity {
        Fidelity::Model
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| CacheError::EmbeddingEngineFailure(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: HttpEmbedResponse = response.json().await.map_err(|e| {
                            CacheError::EmbeddingEngineFailure(format!(
                                "invalid embed response: {}",
                                e
                            ))
                        })?;
                        return Ok(parsed.embeddings);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = Some(CacheError::EmbeddingEngineFailure(format!(
                            "embed endpoint error {}: {}",
                            status, text
                        )));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(CacheError::EmbeddingEngineFailure(format!(
                        "embed endpoint error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(CacheError::EmbeddingEngineFailure(format!(
                        "embed endpoint unreachable at {}: {}",
                        self.url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            CacheError::EmbeddingEngineFailure("embedding failed after retries".to_string())
        }))
    }
}

// ============ Vector math ============

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Mismatched lengths, empty vectors, and
/// zero vectors all score `0.0` by definition.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristic() -> HeuristicEmbedder {
        HeuristicEmbedder::new(&EmbeddingConfig::default())
    }

    #[tokio::test]
    async fn test_heuristic_deterministic() {
        let engine = heuristic();
        let a = engine.embed_text("branch cache lifecycle").await.unwrap();
        let b = engine.embed_text("branch cache lifecycle").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_heuristic_dims_and_unit_length() {
        let engine = heuristic();
        let v = engine.embed_text("hello").await.unwrap();
        assert_eq!(v.len(), DEFAULT_DIMS);
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_heuristic_distinct_texts_differ() {
        let engine = heuristic();
        let a = engine.embed_text("alpha").await.unwrap();
        let b = engine.embed_text("beta").await.unwrap();
        assert_ne!(a, b);
        // Distinct texts should not be near-identical in direction either.
        assert!(cosine_similarity(&a, &b) < 0.99);
    }

    #[tokio::test]
    async fn test_heuristic_batch_matches_single() {
        let engine = heuristic();
        let batch = engine
            .embed_many(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        let single = engine.embed_text("two").await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], single);
    }

    #[test]
    fn test_fidelity_thresholds_ordered() {
        assert!(Fidelity::Heuristic.default_threshold() < Fidelity::Model.default_threshold());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_cosine_bounds() {
        let pairs = [
            (vec![0.3, -0.7, 2.0], vec![1.5, 0.2, -0.9]),
            (vec![10.0, 10.0], vec![-3.0, 4.0]),
            (vec![0.001, 0.002], vec![1000.0, -2000.0]),
        ];
        for (a, b) in &pairs {
            let sim = cosine_similarity(a, b);
            assert!((-1.0001..=1.0001).contains(&sim), "out of bounds: {}", sim);
        }
    }

    #[test]
    fn test_create_embedder_rejects_unknown() {
        let config = EmbeddingConfig {
            provider: "quantum".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_subprocess_requires_command() {
        let config = EmbeddingConfig {
            provider: "subprocess".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(SubprocessEmbedder::new(&config).is_err());
    }
}
