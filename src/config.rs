use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub external: ExternalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    /// Branches trusted as the stable baseline; the first existing one is
    /// used as the merge base for feature-branch queries.
    #[serde(default = "default_trunk_branches")]
    pub trunk_branches: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            metadata_dir: default_metadata_dir(),
            trunk_branches: default_trunk_branches(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".context-rag/cache")
}
fn default_metadata_dir() -> PathBuf {
    PathBuf::from(".context-rag/metadata")
}
fn default_trunk_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

impl CacheConfig {
    pub fn is_trunk(&self, branch: &str) -> bool {
        self.trunk_branches.iter().any(|b| b == branch)
    }

    /// The preferred trunk branch name for merge bases.
    pub fn trunk(&self) -> &str {
        self.trunk_branches
            .first()
            .map(String::as_str)
            .unwrap_or("main")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Root the source directories are resolved against.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceDirConfig>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            sources: default_sources(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

/// One watched directory and how its files are classified.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceDirConfig {
    pub dir: PathBuf,
    pub context_type: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// False for general source directories whose chunks should rank by
    /// similarity alone, without the context-slot reservation.
    #[serde(default = "default_is_context")]
    pub is_context: bool,
}

fn default_is_context() -> bool {
    true
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_priority() -> i32 {
    50
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}
fn default_sources() -> Vec<SourceDirConfig> {
    vec![
        SourceDirConfig {
            dir: PathBuf::from(".context"),
            context_type: "context".to_string(),
            priority: 100,
            is_context: true,
        },
        SourceDirConfig {
            dir: PathBuf::from("specs"),
            context_type: "specification".to_string(),
            priority: 80,
            is_context: true,
        },
        SourceDirConfig {
            dir: PathBuf::from("docs"),
            context_type: "documentation".to_string(),
            priority: 50,
            is_context: true,
        },
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// One of `heuristic`, `subprocess`, `http`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// External command for the `subprocess` provider.
    #[serde(default)]
    pub command: Option<String>,
    /// Endpoint for the `http` provider.
    #[serde(default)]
    pub url: Option<String>,
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
            dims: None,
            command: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "heuristic".to_string()
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
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Overrides the per-provider default similarity cutoff when set.
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    /// Fraction of top-K slots reserved for context chunks.
    #[serde(default = "default_context_slot_fraction")]
    pub context_slot_fraction: f32,
    #[serde(default = "default_snippet_width")]
    pub snippet_width: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: None,
            context_slot_fraction: default_context_slot_fraction(),
            snippet_width: default_snippet_width(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_context_slot_fraction() -> f32 {
    0.6
}
fn default_snippet_width() -> usize {
    240
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExternalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// Fixed score assigned to external results; must outrank any cosine
    /// similarity, which is bounded by 1.0.
    #[serde(default = "default_priority_score")]
    pub priority_score: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            priority_score: default_priority_score(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_priority_score() -> f32 {
    1000.0
}

/// Load configuration from a TOML file.
///
/// A missing file is not an error: every section has workable defaults, so
/// the tool runs unconfigured in any repository.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.context_slot_fraction) {
        anyhow::bail!("retrieval.context_slot_fraction must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "heuristic" | "subprocess" | "http" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be heuristic, subprocess, or http.",
            other
        ),
    }

    if config.embedding.provider == "subprocess" && config.embedding.command.is_none() {
        anyhow::bail!("embedding.command must be set when provider is 'subprocess'");
    }

    if config.external.enabled && config.external.url.is_none() {
        anyhow::bail!("external.url must be set when external.enabled is true");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/crag.toml")).unwrap();
        assert_eq!(config.embedding.provider, "heuristic");
        assert_eq!(config.retrieval.top_k, 10);
        assert!((config.retrieval.context_slot_fraction - 0.6).abs() < 1e-6);
        assert!(config.cache.is_trunk("main"));
        assert!(config.cache.is_trunk("master"));
        assert!(!config.cache.is_trunk("feature/x"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crag.toml");
        std::fs::write(&path, "[embedding]\nprovider = \"quantum\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_subprocess_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crag.toml");
        std::fs::write(&path, "[embedding]\nprovider = \"subprocess\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crag.toml");
        std::fs::write(
            &path,
            r#"
[cache]
dir = ".crag/cache"
metadata_dir = ".crag/meta"
trunk_branches = ["trunk"]

[[discovery.sources]]
dir = "design"
context_type = "design"
priority = 90

[retrieval]
top_k = 5
similarity_threshold = 0.25
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cache.trunk(), "trunk");
        assert_eq!(config.discovery.sources.len(), 1);
        assert_eq!(config.discovery.sources[0].priority, 90);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.similarity_threshold, Some(0.25));
    }
}
