//! Persistence for branch caches, embedding sidecars, and freshness metadata.
//!
//! Layout, relative to the configured directories:
//!
//! | File | Contents |
//! |------|----------|
//! | `<cache-dir>/<safe>.db` | JSON `{ files, chunks, metadata }` |
//! | `<cache-dir>/<safe>_embeddings.json` | JSON `{ model, chunks: [{file_path, chunk_index, embedding}] }` |
//! | `<metadata-dir>/<safe>.json` | JSON freshness record |
//!
//! Embeddings live in a sidecar so the hot cache file stays small when
//! vectors are large; `load` joins them back onto chunks by
//! `(file_path, chunk_index)`, preferring sidecar data when both define one.
//!
//! Every write goes through a same-directory temp file followed by a rename,
//! atomic on POSIX filesystems. Malformed JSON on load surfaces as
//! [`CacheError::CacheCorrupted`], never as an empty cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::models::{BranchCache, CacheMetadata};

/// Reads and writes one branch's persisted chunk collection as an atomic unit.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
    metadata_dir: PathBuf,
}

/// Sidecar file shape.
#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingSidecar {
    #[serde(default)]
    model: Option<String>,
    chunks: Vec<SidecarEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarEntry {
    file_path: String,
    chunk_index: usize,
    embedding: Vec<f32>,
}

/// Replace any character outside `[A-Za-z0-9-_]` with `_` so branch names
/// like `feature/login` map to stable filenames.
pub fn safe_branch_name(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl CacheStore {
    pub fn new(cache_dir: impl Into<PathBuf>, metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn cache_path(&self, branch: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.db", safe_branch_name(branch)))
    }

    pub fn sidecar_path(&self, branch: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}_embeddings.json", safe_branch_name(branch)))
    }

    pub fn metadata_path(&self, branch: &str) -> PathBuf {
        self.metadata_dir
            .join(format!("{}.json", safe_branch_name(branch)))
    }

    /// Load a branch cache, joining the embeddings sidecar when present.
    ///
    /// Returns `Ok(None)` when no cache file exists. A cache file that fails
    /// to parse is a [`CacheError::CacheCorrupted`]; callers decide whether
    /// to fall back to a rebuild.
    pub fn load(&self, branch: &str) -> Result<Option<BranchCache>> {
        let path = self.cache_path(branch);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| CacheError::io(&path, e))?;
        let mut cache: BranchCache = serde_json::from_str(&content)
            .map_err(|e| CacheError::corrupted(branch, &path, e))?;

        if let Some(sidecar) = self.load_sidecar(branch)? {
            let mut by_key: HashMap<(String, usize), Vec<f32>> = sidecar
                .chunks
                .into_iter()
                .map(|e| ((e.file_path, e.chunk_index), e.embedding))
                .collect();

            for chunk in &mut cache.chunks {
                if let Some(vector) = by_key.remove(&chunk.key()) {
                    // Sidecar data wins when both define an embedding.
                    chunk.embedding = Some(vector);
                }
            }
        }

        Ok(Some(cache))
    }

    fn load_sidecar(&self, branch: &str) -> Result<Option<EmbeddingSidecar>> {
        let path = self.sidecar_path(branch);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| CacheError::io(&path, e))?;
        let sidecar: EmbeddingSidecar = serde_json::from_str(&content)
            .map_err(|e| CacheError::corrupted(branch, &path, e))?;
        Ok(Some(sidecar))
    }

    /// Persist a branch cache and, when any chunk carries an embedding, a
    /// sidecar keyed the same way.
    ///
    /// Embeddings are written to the sidecar only; the hot cache file stays
    /// small and the load path joins the vectors back on.
    pub fn save(&self, branch: &str, cache: &BranchCache) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::io(&self.cache_dir, e))?;

        let entries: Vec<SidecarEntry> = cache
            .chunks
            .iter()
            .filter_map(|c| {
                c.embedding.as_ref().map(|v| SidecarEntry {
                    file_path: c.file_path.clone(),
                    chunk_index: c.chunk_index,
                    embedding: v.clone(),
                })
            })
            .collect();

        let mut hot = cache.clone();
        for chunk in &mut hot.chunks {
            chunk.embedding = None;
        }
        write_json_atomic(&self.cache_path(branch), &hot)?;

        if entries.is_empty() {
            // A stale sidecar would otherwise be rejoined on the next load.
            let sidecar = self.sidecar_path(branch);
            if sidecar.exists() {
                fs::remove_file(&sidecar).map_err(|e| CacheError::io(&sidecar, e))?;
            }
        } else {
            let sidecar = EmbeddingSidecar {
                model: cache.metadata.embedding_model.clone(),
                chunks: entries,
            };
            write_json_atomic(&self.sidecar_path(branch), &sidecar)?;
        }

        debug!(branch, chunks = cache.chunks.len(), "saved branch cache");
        Ok(())
    }

    /// Delete the cache and sidecar files if present.
    ///
    /// Each deletion is independent; one file missing (or failing to delete)
    /// does not abort removal of the other.
    pub fn remove(&self, branch: &str) {
        for path in [self.cache_path(branch), self.sidecar_path(branch)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cache file"),
            }
        }
    }

    /// Load the freshness record for a branch, if any.
    pub fn load_metadata(&self, branch: &str) -> Result<Option<CacheMetadata>> {
        let path = self.metadata_path(branch);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| CacheError::io(&path, e))?;
        let metadata: CacheMetadata = serde_json::from_str(&content)
            .map_err(|e| CacheError::corrupted(branch, &path, e))?;
        Ok(Some(metadata))
    }

    pub fn save_metadata(&self, branch: &str, metadata: &CacheMetadata) -> Result<()> {
        fs::create_dir_all(&self.metadata_dir)
            .map_err(|e| CacheError::io(&self.metadata_dir, e))?;
        write_json_atomic(&self.metadata_path(branch), metadata)
    }

    /// Best-effort metadata removal.
    pub fn remove_metadata(&self, branch: &str) {
        let path = self.metadata_path(branch);
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed cache metadata"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cache metadata"),
        }
    }

    /// Every branch that has a cache file on disk, with its file size and
    /// modification time. Branch names come from cache metadata when
    /// readable, falling back to the (lossy) filename stem.
    pub fn list_cached(&self) -> Vec<(String, u64, Option<std::time::SystemTime>)> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return out,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let meta = entry.metadata().ok();
            let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
            let modified = meta.and_then(|m| m.modified().ok());

            let branch = fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<BranchCache>(&c).ok())
                .map(|c| c.metadata.branch)
                .unwrap_or(stem);

            out.push((branch, size, modified));
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Serialize to a same-directory temp file, then rename over the target.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)
        .map_err(|e| CacheError::io(path, std::io::Error::other(e)))?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json.as_bytes()).map_err(|e| CacheError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use tempfile::TempDir;

    fn store() -> (TempDir, CacheStore) {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"), tmp.path().join("metadata"));
        (tmp, store)
    }

    fn chunk(path: &str, index: usize, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            file_path: path.to_string(),
            chunk_index: index,
            content: format!("content of {} #{}", path, index),
            embedding,
            file_hash: "abc123".to_string(),
            modified_time: 1_700_000_000_000,
            is_context: false,
            context_type: None,
            priority: 0,
            provenance: None,
        }
    }

    #[test]
    fn test_safe_branch_name() {
        assert_eq!(safe_branch_name("main"), "main");
        assert_eq!(safe_branch_name("feature/login"), "feature_login");
        assert_eq!(safe_branch_name("fix#12 (wip)"), "fix_12__wip_");
        assert_eq!(safe_branch_name("release-1.2"), "release-1_2");
    }

    #[test]
    fn test_load_missing_is_none() {
        let (_tmp, store) = store();
        assert!(store.load("main").unwrap().is_none());
    }

    #[test]
    fn test_save_load_roundtrip_with_sidecar() {
        let (_tmp, store) = store();

        let mut cache = BranchCache::new("feature/x");
        cache.chunks.push(chunk("doc.md", 0, Some(vec![1.0, 0.0])));
        cache.chunks.push(chunk("doc.md", 1, None));
        store.save("feature/x", &cache).unwrap();

        assert!(store.cache_path("feature/x").exists());
        assert!(store.sidecar_path("feature/x").exists());

        let loaded = store.load("feature/x").unwrap().unwrap();
        assert_eq!(loaded.chunks.len(), 2);
        assert_eq!(loaded.chunks[0].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(loaded.chunks[1].embedding, None);
        assert_eq!(loaded.metadata.branch, "feature/x");
    }

    #[test]
    fn test_sidecar_wins_over_inline_embedding() {
        let (_tmp, store) = store();

        let mut cache = BranchCache::new("main");
        cache.chunks.push(chunk("doc.md", 0, Some(vec![0.5, 0.5])));
        store.save("main", &cache).unwrap();

        // Rewrite the sidecar with a different vector for the same key.
        let sidecar = EmbeddingSidecar {
            model: Some("other".to_string()),
            chunks: vec![SidecarEntry {
                file_path: "doc.md".to_string(),
                chunk_index: 0,
                embedding: vec![9.0, 9.0],
            }],
        };
        write_json_atomic(&store.sidecar_path("main"), &sidecar).unwrap();

        let loaded = store.load("main").unwrap().unwrap();
        assert_eq!(loaded.chunks[0].embedding, Some(vec![9.0, 9.0]));
    }

    #[test]
    fn test_no_embeddings_means_no_sidecar() {
        let (_tmp, store) = store();

        let mut cache = BranchCache::new("main");
        cache.chunks.push(chunk("doc.md", 0, None));
        store.save("main", &cache).unwrap();

        assert!(!store.sidecar_path("main").exists());
    }

    #[test]
    fn test_corrupted_cache_is_typed_error() {
        let (_tmp, store) = store();
        fs::create_dir_all(store.cache_path("main").parent().unwrap()).unwrap();
        fs::write(store.cache_path("main"), "{ not valid json").unwrap();

        match store.load("main") {
            Err(CacheError::CacheCorrupted { branch, .. }) => assert_eq!(branch, "main"),
            other => panic!("expected CacheCorrupted, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_is_best_effort_and_partial_ok() {
        let (_tmp, store) = store();

        let mut cache = BranchCache::new("main");
        cache.chunks.push(chunk("doc.md", 0, None));
        store.save("main", &cache).unwrap();

        // Only the cache file exists; removing both must not error.
        assert!(!store.sidecar_path("main").exists());
        store.remove("main");
        assert!(!store.cache_path("main").exists());

        // Removing again with nothing present is a no-op.
        store.remove("main");
    }

    #[test]
    fn test_metadata_roundtrip() {
        let (_tmp, store) = store();

        let metadata = CacheMetadata {
            branch: "feature/x".to_string(),
            created: chrono::Utc::now(),
            fingerprint: "deadbeefdeadbeef".to_string(),
            source_directories: vec!["docs".to_string()],
            indexed_file_count: 3,
        };
        store.save_metadata("feature/x", &metadata).unwrap();

        let loaded = store.load_metadata("feature/x").unwrap().unwrap();
        assert_eq!(loaded.fingerprint, "deadbeefdeadbeef");
        assert_eq!(loaded.indexed_file_count, 3);

        store.remove_metadata("feature/x");
        assert!(store.load_metadata("feature/x").unwrap().is_none());
    }

    #[test]
    fn test_list_cached_reports_real_branch_names() {
        let (_tmp, store) = store();
        store.save("feature/x", &BranchCache::new("feature/x")).unwrap();
        store.save("main", &BranchCache::new("main")).unwrap();

        let listed = store.list_cached();
        let names: Vec<&str> = listed.iter().map(|(b, _, _)| b.as_str()).collect();
        assert_eq!(names, vec!["feature/x", "main"]);
    }
}
