//! Context-prioritized retrieval over the effective branch cache.
//!
//! A query resolves its index in branch-aware fashion: feature branches get
//! a merged view over the trunk baseline plus their own cache, trunk (or
//! no-branch) queries load the branch cache directly. Candidates then flow
//! through metadata filters, cosine scoring against the query embedding, a
//! fidelity-dependent similarity threshold, context-slot reservation, and
//! optional external-source blending before the final top-K cut.
//!
//! Search is a linear scan over cached vectors. That is a deliberate
//! capacity limit at this scale; an approximate nearest-neighbor index could
//! replace the scan behind the same [`RetrievalEngine::search`] contract.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{cosine_similarity, create_embedder, Embedder};
use crate::error::{CacheError, Result};
use crate::external::{create_knowledge_source, KnowledgeSource};
use crate::git::GitInfo;
use crate::merge::ContextMerger;
use crate::models::{Chunk, FileMetadata, FileRecord, RankedResult, ResultOrigin};
use crate::snippet::extract_snippet;
use crate::store::CacheStore;

/// Metadata filters applied against each chunk's owning file record.
///
/// `feature` and `doc_type` are exact-match AND conditions; `tags` ANDs with
/// the other filters but is an OR within itself (a chunk matches when its
/// file's tag set intersects the requested set). A chunk whose file carries
/// no metadata is excluded whenever any filter is active.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryFilters {
    pub feature: Option<String>,
    pub doc_type: Option<String>,
    pub tags: Vec<String>,
}

impl QueryFilters {
    pub fn is_active(&self) -> bool {
        self.feature.is_some() || self.doc_type.is_some() || !self.tags.is_empty()
    }

    fn matches(&self, metadata: Option<&FileMetadata>) -> bool {
        if !self.is_active() {
            return true;
        }
        let metadata = match metadata {
            Some(m) => m,
            None => return false,
        };

        if let Some(feature) = &self.feature {
            if metadata.feature.as_deref() != Some(feature.as_str()) {
                return false;
            }
        }
        if let Some(doc_type) = &self.doc_type {
            if metadata.doc_type.as_deref() != Some(doc_type.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| metadata.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Per-query knobs; anything unset falls back to configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
    pub filters: QueryFilters,
}

/// The effective index a query runs against.
#[derive(Debug)]
pub struct LoadedIndex {
    pub branch: String,
    pub merged: bool,
    pub chunks: Vec<Chunk>,
    pub files: BTreeMap<String, FileRecord>,
}

/// Answers similarity queries over the effective branch cache.
pub struct RetrievalEngine {
    config: Config,
    store: CacheStore,
    git: GitInfo,
    embedder: Box<dyn Embedder>,
    external: Option<Box<dyn KnowledgeSource>>,
}

impl RetrievalEngine {
    /// Build an engine with every collaborator derived from configuration.
    pub fn from_config(config: Config, root: impl Into<std::path::PathBuf>) -> Result<Self> {
        let store = CacheStore::new(&config.cache.dir, &config.cache.metadata_dir);
        let git = GitInfo::new(root);
        let embedder = create_embedder(&config.embedding)?;
        let external = create_knowledge_source(&config.external);
        Ok(Self::new(config, store, git, embedder, external))
    }

    /// Build an engine from explicit collaborators (used by tests and
    /// callers that share a store).
    pub fn new(
        config: Config,
        store: CacheStore,
        git: GitInfo,
        embedder: Box<dyn Embedder>,
        external: Option<Box<dyn KnowledgeSource>>,
    ) -> Self {
        Self {
            config,
            store,
            git,
            embedder,
            external,
        }
    }

    /// Resolve the effective index for the current branch.
    ///
    /// Feature branches prefer a merged view over `(trunk, current)`; if
    /// neither side has a cache the branch's own cache is tried directly.
    /// Trunk and no-branch queries always load directly. No cache at all is
    /// [`CacheError::IndexNotFound`].
    pub fn load_index(&self) -> Result<LoadedIndex> {
        let current = match self.git.current_branch() {
            Ok(branch) => branch,
            Err(e) => {
                warn!(error = %e, "git unavailable; treating as no branch");
                None
            }
        };

        let trunk = self.config.cache.trunk().to_string();

        if let Some(branch) = current {
            if !self.config.cache.is_trunk(&branch) {
                let merger = ContextMerger::new(self.store.clone(), self.git.clone());
                if let Some(view) = merger.merge_contexts(&trunk, &branch)? {
                    debug!(branch = %branch, base = %trunk, "using merged view");
                    return Ok(LoadedIndex {
                        branch,
                        merged: true,
                        chunks: view.chunks,
                        files: view.files,
                    });
                }
            }
            return self.load_direct(&branch);
        }

        self.load_direct(&trunk)
    }

    fn load_direct(&self, branch: &str) -> Result<LoadedIndex> {
        match self.store.load(branch)? {
            Some(cache) => Ok(LoadedIndex {
                branch: branch.to_string(),
                merged: false,
                chunks: cache.chunks,
                files: cache.files,
            }),
            None => Err(CacheError::IndexNotFound {
                branch: branch.to_string(),
            }),
        }
    }

    /// Run a similarity query and return the ranked, capped result list.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<RankedResult>> {
        let index = self.load_index()?;
        let top_k = options.top_k.unwrap_or(self.config.retrieval.top_k).max(1);
        let snippet_width = self.config.retrieval.snippet_width;

        // External results come first and outrank any local similarity.
        let mut results: Vec<RankedResult> = Vec::new();
        if let Some(source) = &self.external {
            match source.query(query, Some(&options.filters)).await {
                Ok(hits) => {
                    debug!(count = hits.len(), source = source.name(), "external hits");
                    results.extend(hits.into_iter().map(|hit| {
                        let file_path = hit
                            .metadata
                            .get("file_path")
                            .and_then(|v| v.as_str())
                            .unwrap_or("external")
                            .to_string();
                        RankedResult {
                            file_path,
                            chunk_index: 0,
                            snippet: extract_snippet(&hit.content, query, snippet_width),
                            similarity: 0.0,
                            priority_score: Some(self.config.external.priority_score),
                            is_context: false,
                            context_type: None,
                            source_branch: None,
                            origin: ResultOrigin::External,
                        }
                    }));
                }
                Err(e) => {
                    warn!(error = %e, "external knowledge source failed; continuing with local results");
                }
            }
        }

        // Metadata filtering against each chunk's owning file record.
        let candidates: Vec<&Chunk> = index
            .chunks
            .iter()
            .filter(|c| {
                options
                    .filters
                    .matches(index.files.get(&c.file_path).and_then(|r| r.metadata.as_ref()))
            })
            .collect();

        // Embedding failure is fatal for the query; embeddings are
        // deterministic, so there is nothing to gain from a retry here.
        let query_vec = self.embedder.embed_text(query).await?;

        let threshold = options
            .threshold
            .or(self.config.retrieval.similarity_threshold)
            .unwrap_or_else(|| self.embedder.fidelity().default_threshold());

        // Chunks without an embedding are absent from ranking entirely.
        let scored: Vec<(f32, &Chunk)> = candidates
            .iter()
            .filter_map(|c| {
                c.embedding
                    .as_ref()
                    .map(|e| (cosine_similarity(&query_vec, e), *c))
            })
            .filter(|(similarity, _)| *similarity >= threshold)
            .collect();

        let selected = select_with_context_slots(
            scored,
            top_k,
            self.config.retrieval.context_slot_fraction,
        );

        results.extend(selected.into_iter().map(|(similarity, chunk)| RankedResult {
            file_path: chunk.file_path.clone(),
            chunk_index: chunk.chunk_index,
            snippet: extract_snippet(&chunk.content, query, snippet_width),
            similarity,
            priority_score: None,
            is_context: chunk.is_context,
            context_type: chunk.context_type.clone(),
            source_branch: chunk.provenance.as_ref().map(|p| p.source_branch.clone()),
            origin: ResultOrigin::Local,
        }));

        // Final ordering: priority_score where present, else similarity.
        results.sort_by(|a, b| {
            rank_key(b)
                .partial_cmp(&rank_key(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }
}

fn rank_key(result: &RankedResult) -> f32 {
    result.priority_score.unwrap_or(result.similarity)
}

/// Fill `top_k` slots, reserving `fraction` of them for context chunks.
///
/// Context chunks compete for reserved slots by `(priority desc, similarity
/// desc)`; remaining slots go to the best non-context chunks by similarity,
/// then to leftover context chunks when non-context candidates run out.
/// Without any context chunk the selection is plain top-K by similarity.
fn select_with_context_slots(
    scored: Vec<(f32, &Chunk)>,
    top_k: usize,
    fraction: f32,
) -> Vec<(f32, &Chunk)> {
    let (mut context, mut plain): (Vec<_>, Vec<_>) =
        scored.into_iter().partition(|(_, c)| c.is_context);

    by_similarity(&mut plain);

    if context.is_empty() {
        plain.truncate(top_k);
        return plain;
    }

    context.sort_by(|a, b| {
        b.1.priority
            .cmp(&a.1.priority)
            .then(b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal))
    });

    let reserved = ((top_k as f32) * fraction).round() as usize;
    let reserved = reserved.min(top_k);

    let mut selected: Vec<(f32, &Chunk)> = Vec::with_capacity(top_k);
    let mut context_iter = context.into_iter();

    for _ in 0..reserved {
        match context_iter.next() {
            Some(item) => selected.push(item),
            None => break,
        }
    }

    let mut remainder: Vec<(f32, &Chunk)> = plain;
    remainder.extend(context_iter);
    // Non-context candidates sort ahead of leftover context only by
    // similarity; the quota has already been honored above.
    by_similarity(&mut remainder);

    for item in remainder {
        if selected.len() == top_k {
            break;
        }
        selected.push(item);
    }

    selected
}

fn by_similarity(items: &mut [(f32, &Chunk)]) {
    items.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
}
