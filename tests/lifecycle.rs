//! Cross-module integration tests: index a working tree, exercise the
//! branch lifecycle, and query through the retrieval engine.
//!
//! Everything runs against a temp directory with the deterministic
//! heuristic embedder, so no network, subprocess, or git repository is
//! required.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use context_rag::branch::{BranchCacheManager, BranchOperation};
use context_rag::config::{CacheConfig, Config, DiscoveryConfig, EmbeddingConfig, SourceDirConfig};
use context_rag::discovery::ContextDiscovery;
use context_rag::embedding::HeuristicEmbedder;
use context_rag::error::CacheError;
use context_rag::git::GitInfo;
use context_rag::indexer::Indexer;
use context_rag::merge::ContextMerger;
use context_rag::search::{RetrievalEngine, SearchOptions};
use context_rag::store::CacheStore;

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        Self { tmp }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn write_doc(&self, name: &str, content: &str) {
        fs::write(self.root().join("docs").join(name), content).unwrap();
    }

    fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            root: self.root().to_path_buf(),
            sources: vec![SourceDirConfig {
                dir: PathBuf::from("docs"),
                context_type: "documentation".to_string(),
                priority: 50,
                is_context: true,
            }],
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
        }
    }

    fn store(&self) -> CacheStore {
        CacheStore::new(
            self.root().join(".context-rag/cache"),
            self.root().join(".context-rag/metadata"),
        )
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(
            self.store(),
            ContextDiscovery::new(self.discovery_config()),
            16,
        )
    }

    fn config(&self) -> Config {
        Config {
            cache: CacheConfig {
                dir: self.root().join(".context-rag/cache"),
                metadata_dir: self.root().join(".context-rag/metadata"),
                trunk_branches: vec!["main".to_string(), "master".to_string()],
            },
            discovery: self.discovery_config(),
            ..Config::default()
        }
    }

    fn engine(&self) -> RetrievalEngine {
        RetrievalEngine::new(
            self.config(),
            self.store(),
            GitInfo::new(self.root()), // temp dir is not a repo: trunk load
            Box::new(HeuristicEmbedder::new(&EmbeddingConfig::default())),
            None,
        )
    }

    fn manager(&self) -> BranchCacheManager {
        BranchCacheManager::new(
            self.store(),
            ContextDiscovery::new(self.discovery_config()),
            CacheConfig {
                dir: self.root().join(".context-rag/cache"),
                metadata_dir: self.root().join(".context-rag/metadata"),
                trunk_branches: vec!["main".to_string(), "master".to_string()],
            },
        )
    }
}

#[tokio::test]
async fn index_then_query_roundtrip() {
    let ws = Workspace::new();
    ws.write_doc("cache.md", "The branch cache is invalidated by fingerprints.");
    ws.write_doc("other.md", "Completely unrelated gardening notes.");

    let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
    let report = ws
        .indexer()
        .index_branch("main", &embedder)
        .await
        .unwrap();
    assert_eq!(report.indexed_files, 2);

    // Querying with a chunk's exact content embeds to the identical vector,
    // so that chunk scores 1.0 while unrelated chunks stay far below.
    let options = SearchOptions {
        threshold: Some(0.5),
        ..SearchOptions::default()
    };
    let results = ws
        .engine()
        .search("The branch cache is invalidated by fingerprints.", &options)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_path, "docs/cache.md");
    assert!((results[0].similarity - 1.0).abs() < 1e-5);
    assert!(results[0].is_context);
}

#[tokio::test]
async fn branch_isolation_direct_loads() {
    let ws = Workspace::new();
    ws.write_doc("a.md", "alpha content");

    let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
    ws.indexer().index_branch("x", &embedder).await.unwrap();

    // Branch y was never indexed: its direct load exposes none of x's chunks.
    let store = ws.store();
    assert!(store.load("x").unwrap().is_some());
    assert!(store.load("y").unwrap().is_none());
}

#[tokio::test]
async fn merge_view_carries_baseline_for_unindexed_feature() {
    let ws = Workspace::new();
    ws.write_doc("README.md", "Baseline readme content.");

    let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
    ws.indexer().index_branch("main", &embedder).await.unwrap();

    // feature/x has no cache of its own; the merged view still serves the
    // baseline chunk, tagged as unmodified base content.
    let merger = ContextMerger::new(ws.store(), GitInfo::new(ws.root()));
    let view = merger.merge_contexts("main", "feature/x").unwrap().unwrap();

    assert_eq!(view.chunks.len(), 1);
    assert_eq!(view.chunks[0].file_path, "docs/README.md");
    let provenance = view.chunks[0].provenance.as_ref().unwrap();
    assert!(provenance.is_base);
    assert!(!provenance.is_modified);
    assert_eq!(view.stats.base_chunks, 1);
    assert_eq!(view.stats.feature_chunks, 0);
}

#[tokio::test]
async fn switch_away_removes_cache_and_trunk_needs_no_rebuild() {
    let ws = Workspace::new();
    ws.write_doc("a.md", "alpha");

    let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
    ws.indexer()
        .index_branch("feature/x", &embedder)
        .await
        .unwrap();
    ws.indexer().index_branch("main", &embedder).await.unwrap();

    let store = ws.store();
    assert!(store.cache_path("feature/x").exists());
    assert!(store.metadata_path("feature/x").exists());

    let result = ws
        .manager()
        .handle_branch_operation(&BranchOperation::Switch {
            from: Some("feature/x".to_string()),
            to: "main".to_string(),
        })
        .unwrap();

    assert!(!result.rebuilt);
    assert_eq!(result.removed_branch.as_deref(), Some("feature/x"));
    assert!(!store.cache_path("feature/x").exists());
    assert!(!store.sidecar_path("feature/x").exists());
    assert!(!store.metadata_path("feature/x").exists());
    // Trunk cache survives and keeps serving queries.
    assert!(store.load("main").unwrap().is_some());
}

#[tokio::test]
async fn unindexed_workspace_query_fails_typed() {
    let ws = Workspace::new();

    match ws.engine().search("anything", &SearchOptions::default()).await {
        Err(CacheError::IndexNotFound { branch }) => assert_eq!(branch, "main"),
        other => panic!("expected IndexNotFound, got {:?}", other.map(|r| r.len())),
    }
}

#[tokio::test]
async fn reindex_after_change_updates_freshness() {
    let ws = Workspace::new();
    ws.write_doc("a.md", "version one");

    let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
    ws.indexer().index_branch("feature/x", &embedder).await.unwrap();

    let manager = ws.manager();
    assert!(!manager.should_rebuild_for_branch("feature/x").unwrap());

    ws.write_doc("a.md", "version two, now with more words");
    assert!(manager.should_rebuild_for_branch("feature/x").unwrap());

    ws.indexer().index_branch("feature/x", &embedder).await.unwrap();
    assert!(!manager.should_rebuild_for_branch("feature/x").unwrap());

    let status = manager.cache_status("feature/x").unwrap();
    assert!(status.exists);
    assert!(status.fresh);
}

#[tokio::test]
async fn sidecar_keeps_hot_cache_small_and_rejoins() {
    let ws = Workspace::new();
    ws.write_doc("a.md", "some content to embed");

    let embedder = HeuristicEmbedder::new(&EmbeddingConfig::default());
    ws.indexer().index_branch("main", &embedder).await.unwrap();

    let store = ws.store();
    // Embeddings are persisted in the sidecar, not the hot cache file.
    let raw = fs::read_to_string(store.cache_path("main")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(parsed["chunks"][0].get("embedding").is_none());
    assert!(store.sidecar_path("main").exists());

    // The load path joins them back on.
    let cache = store.load("main").unwrap().unwrap();
    assert!(cache.chunks[0].embedding.is_some());
}
