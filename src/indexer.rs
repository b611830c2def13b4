//! Indexing pipeline: discovered files → chunks → embeddings → branch cache.
//!
//! One pass over the discovered file set reads each file, hashes its
//! content, splits it into chunks, embeds the chunks in batches, and
//! persists the resulting branch cache plus a fresh freshness record
//! (fingerprint, counts, source directories).
//!
//! Per-file read failures are warned and skipped; one unreadable file never
//! aborts indexing of the rest. An empty discovery result leaves any prior
//! cache untouched.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chunk::{chunk_content, DEFAULT_MAX_CHUNK_CHARS};
use crate::discovery::ContextDiscovery;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::models::{BranchCache, CacheMetadata, Chunk, FileMetadata, FileRecord};
use crate::store::CacheStore;

/// Counts reported by one indexing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub branch: String,
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub skipped_files: usize,
}

/// Populates one branch's cache from the discovered file set.
pub struct Indexer {
    store: CacheStore,
    discovery: ContextDiscovery,
    batch_size: usize,
}

impl Indexer {
    pub fn new(store: CacheStore, discovery: ContextDiscovery, batch_size: usize) -> Self {
        Self {
            store,
            discovery,
            batch_size: batch_size.max(1),
        }
    }

    /// Index the current working tree into `branch`'s cache.
    pub async fn index_branch(&self, branch: &str, embedder: &dyn Embedder) -> Result<IndexReport> {
        let files = self.discovery.discover_relevant_files()?;
        if files.is_empty() {
            info!(branch, "no relevant files discovered; cache left untouched");
            return Ok(IndexReport {
                branch: branch.to_string(),
                indexed_files: 0,
                total_chunks: 0,
                skipped_files: 0,
            });
        }

        let mut cache = BranchCache::new(branch);
        cache.metadata.embedding_model = Some(embedder.model_name().to_string());
        let mut skipped_files = 0usize;

        for file in &files {
            let absolute = self.discovery.root().join(&file.path);
            let content = match std::fs::read_to_string(&absolute) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %absolute.display(), error = %e, "skipping unreadable file");
                    skipped_files += 1;
                    continue;
                }
            };

            let file_hash = hex::encode(Sha256::digest(content.as_bytes()));
            let metadata = parse_front_matter(&content);
            let pieces = chunk_content(&content, DEFAULT_MAX_CHUNK_CHARS);

            for (chunk_index, piece) in pieces.iter().enumerate() {
                cache.chunks.push(Chunk {
                    file_path: file.path.clone(),
                    chunk_index,
                    content: piece.clone(),
                    embedding: None,
                    file_hash: file_hash.clone(),
                    modified_time: file.modified_time,
                    is_context: file.is_context,
                    context_type: file.is_context.then(|| file.context_type.clone()),
                    priority: file.priority,
                    provenance: None,
                });
            }

            cache.files.insert(
                file.path.clone(),
                FileRecord {
                    hash: file_hash,
                    modified_time: file.modified_time,
                    chunk_count: pieces.len(),
                    metadata,
                },
            );
        }

        if cache.files.is_empty() {
            // Every discovered file failed to read; keep any prior cache
            // rather than replacing it with an empty one.
            warn!(branch, skipped = skipped_files, "no file could be indexed; cache left untouched");
            return Ok(IndexReport {
                branch: branch.to_string(),
                indexed_files: 0,
                total_chunks: 0,
                skipped_files,
            });
        }

        self.embed_chunks(&mut cache, embedder).await?;
        self.store.save(branch, &cache)?;

        let metadata = CacheMetadata {
            branch: branch.to_string(),
            created: Utc::now(),
            fingerprint: fingerprint(&files),
            source_directories: self.discovery.source_directories(),
            indexed_file_count: cache.files.len(),
        };
        self.store.save_metadata(branch, &metadata)?;

        let report = IndexReport {
            branch: branch.to_string(),
            indexed_files: cache.files.len(),
            total_chunks: cache.chunks.len(),
            skipped_files,
        };
        info!(
            branch,
            files = report.indexed_files,
            chunks = report.total_chunks,
            skipped = report.skipped_files,
            "indexed branch"
        );
        Ok(report)
    }

    async fn embed_chunks(&self, cache: &mut BranchCache, embedder: &dyn Embedder) -> Result<()> {
        let texts: Vec<String> = cache.chunks.iter().map(|c| c.content.clone()).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(embedder.embed_many(batch).await?);
        }

        for (chunk, vector) in cache.chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }
        Ok(())
    }
}

/// Scan a leading `---` front-matter block for `feature:`, `type:`, and
/// `tags:` keys. Returns `None` when no block or no recognized key exists.
fn parse_front_matter(content: &str) -> Option<FileMetadata> {
    let mut lines = content.lines();
    if lines.next()?.trim() != "---" {
        return None;
    }

    let mut metadata = FileMetadata::default();
    let mut found = false;

    for line in lines {
        let line = line.trim();
        if line == "---" {
            break;
        }
        let (key, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim();
        match key.trim() {
            "feature" => {
                metadata.feature = Some(value.to_string());
                found = true;
            }
            "type" => {
                metadata.doc_type = Some(value.to_string());
                found = true;
            }
            "tags" => {
                metadata.tags = value
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                found = !metadata.tags.is_empty() || found;
            }
            _ => {}
        }
    }

    found.then_some(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, EmbeddingConfig, SourceDirConfig};
    use crate::embedding::HeuristicEmbedder;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn indexer(tmp: &TempDir) -> (CacheStore, Indexer) {
        let store = CacheStore::new(tmp.path().join("cache"), tmp.path().join("metadata"));
        let discovery = ContextDiscovery::new(DiscoveryConfig {
            root: tmp.path().to_path_buf(),
            sources: vec![SourceDirConfig {
                dir: PathBuf::from("docs"),
                context_type: "documentation".to_string(),
                priority: 50,
                is_context: true,
            }],
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
        });
        (store.clone(), Indexer::new(store, discovery, 8))
    }

    #[test]
    fn test_front_matter_parsed() {
        let content = "---\nfeature: auth\ntype: spec\ntags: [security, login]\n---\n# Body\n";
        let metadata = parse_front_matter(content).unwrap();
        assert_eq!(metadata.feature.as_deref(), Some("auth"));
        assert_eq!(metadata.doc_type.as_deref(), Some("spec"));
        assert_eq!(metadata.tags, vec!["security", "login"]);
    }

    #[test]
    fn test_front_matter_absent() {
        assert_eq!(parse_front_matter("# Just a heading\n"), None);
        assert_eq!(parse_front_matter("---\nauthor: someone\n---\n"), None);
    }

    #[test]
    fn test_front_matter_comma_list_tags() {
        let content = "---\ntags: a, b\n---\nbody";
        let metadata = parse_front_matter(content).unwrap();
        assert_eq!(metadata.tags, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_index_branch_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let (store, indexer) = indexer(&tmp);
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(
            tmp.path().join("docs/guide.md"),
            "---\nfeature: cache\ntype: guide\n---\nHow the cache works.\n",
        )
        .unwrap();

        let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
        let report = indexer.index_branch("main", &embedder).await.unwrap();
        assert_eq!(report.indexed_files, 1);
        assert!(report.total_chunks >= 1);
        assert_eq!(report.skipped_files, 0);

        let cache = store.load("main").unwrap().unwrap();
        assert_eq!(cache.files.len(), 1);
        let record = &cache.files["docs/guide.md"];
        assert_eq!(record.chunk_count, cache.chunks.len());
        assert_eq!(
            record.metadata.as_ref().unwrap().feature.as_deref(),
            Some("cache")
        );

        for chunk in &cache.chunks {
            assert!(chunk.embedding.is_some());
            assert!(chunk.is_context);
            assert_eq!(chunk.context_type.as_deref(), Some("documentation"));
            assert_eq!(chunk.priority, 50);
        }

        // Freshness metadata written alongside the cache.
        let metadata = store.load_metadata("main").unwrap().unwrap();
        assert_eq!(metadata.indexed_file_count, 1);
        assert!(!metadata.fingerprint.is_empty());
    }

    #[tokio::test]
    async fn test_empty_discovery_leaves_cache_untouched() {
        let tmp = TempDir::new().unwrap();
        let (store, indexer) = indexer(&tmp);

        let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
        let report = indexer.index_branch("main", &embedder).await.unwrap();
        assert_eq!(report.indexed_files, 0);
        assert!(store.load("main").unwrap().is_none());
        assert!(store.load_metadata("main").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks_wholesale() {
        let tmp = TempDir::new().unwrap();
        let (store, indexer) = indexer(&tmp);
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/a.md"), "first version").unwrap();

        let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
        indexer.index_branch("main", &embedder).await.unwrap();
        let first = store.load("main").unwrap().unwrap();

        fs::write(tmp.path().join("docs/a.md"), "second version, different").unwrap();
        indexer.index_branch("main", &embedder).await.unwrap();
        let second = store.load("main").unwrap().unwrap();

        assert_ne!(
            first.files["docs/a.md"].hash,
            second.files["docs/a.md"].hash
        );
        assert_eq!(second.chunks[0].content, "second version, different");
    }
}
