//! Core data models used throughout context-rag.
//!
//! These types represent the chunks, per-file bookkeeping records, and
//! persisted cache units that flow through the indexing and retrieval
//! pipeline. Everything here is plain serde data; behavior lives in the
//! store, branch, merge, and search modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single retrievable span of file content plus its embedding and metadata.
///
/// Identity within one branch cache is `(file_path, chunk_index)`. A chunk is
/// replaced wholesale when its owning file's hash changes, and removed when
/// the file is deleted or the branch cache is rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub file_path: String,
    pub chunk_index: usize,
    pub content: String,
    /// Embedding vector; chunks without one are excluded from ranking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub file_hash: String,
    /// Owning file's modification time, epoch milliseconds.
    pub modified_time: i64,
    /// True for chunks sourced from curated context/spec files.
    #[serde(default)]
    pub is_context: bool,
    /// Classification label; present whenever `is_context` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,
    /// Higher = more authoritative during context-slot ranking.
    #[serde(default)]
    pub priority: i32,
    /// Merge provenance; only populated on chunks that came out of a
    /// [`MergedView`] (and retained when a unified view is persisted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl Chunk {
    /// The cache-wide identity key.
    pub fn key(&self) -> (String, usize) {
        (self.file_path.clone(), self.chunk_index)
    }
}

/// Where a merged chunk came from and how it relates to the base branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Branch the chunk was sourced from.
    pub source_branch: String,
    /// True when the chunk came from the base branch cache.
    pub is_base: bool,
    /// True when the owning file was touched relative to the base branch.
    pub is_modified: bool,
}

/// Per-file bookkeeping inside a branch cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: String,
    pub modified_time: i64,
    pub chunk_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
}

/// Optional per-file attributes used by query filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The persisted unit: one cache per distinct branch name ever indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCache {
    pub files: BTreeMap<String, FileRecord>,
    pub chunks: Vec<Chunk>,
    pub metadata: CacheInfo,
}

impl BranchCache {
    pub fn new(branch: &str) -> Self {
        Self {
            files: BTreeMap::new(),
            chunks: Vec::new(),
            metadata: CacheInfo {
                branch: branch.to_string(),
                created_at: Utc::now(),
                embedding_model: None,
                merge_stats: None,
            },
        }
    }
}

/// Descriptive metadata embedded in the branch cache file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    /// Present only on caches saved from a merged view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_stats: Option<MergeStats>,
}

/// Lightweight freshness record, persisted separately from the (possibly
/// large) branch cache so rebuild decisions never have to load chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub branch: String,
    pub created: DateTime<Utc>,
    pub fingerprint: String,
    pub source_directories: Vec<String>,
    pub indexed_file_count: usize,
}

/// A file observed during context discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    /// Epoch milliseconds.
    pub modified_time: i64,
    pub context_type: String,
    pub priority: i32,
    pub is_context: bool,
}

/// Ephemeral unified view over a base branch cache and a feature branch
/// cache. Never persisted unless explicitly saved via
/// [`crate::merge::ContextMerger::save_unified_view`].
#[derive(Debug, Clone)]
pub struct MergedView {
    pub base_branch: String,
    pub feature_branch: String,
    /// Provenance-tagged chunks in merged ranking order.
    pub chunks: Vec<Chunk>,
    /// Union of both branches' file records; feature branch wins per path.
    pub files: BTreeMap<String, FileRecord>,
    pub stats: MergeStats,
}

/// Counts summarizing a merge result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub base_chunks: usize,
    pub feature_chunks: usize,
    pub modified_chunks: usize,
    pub context_chunks: usize,
}

/// A ranked search hit returned from the retrieval engine.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub file_path: String,
    pub chunk_index: usize,
    pub snippet: String,
    pub similarity: f32,
    /// Set only for external-source results; outranks any similarity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<f32>,
    pub is_context: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    pub origin: ResultOrigin,
}

/// Which result channel produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    Local,
    External,
}

/// Cache presence/freshness summary for one branch.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub branch: String,
    pub exists: bool,
    pub fresh: bool,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// One row of `crag branches` output.
#[derive(Debug, Clone, Serialize)]
pub struct BranchSummary {
    pub branch: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_file_count: Option<usize>,
}
