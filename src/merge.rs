//! Query-time unification of a base branch cache and a feature branch cache.
//!
//! Queries on a feature branch should see both baseline knowledge and
//! branch-local edits. [`ContextMerger`] builds that view on the fly: an
//! insertion-ordered map keyed by `(file_path, chunk_index)` where base
//! chunks land first and feature chunks insert or override in place, so a
//! key present in both caches always resolves to the feature branch's chunk.
//! Precedence is by branch, never by timestamp.
//!
//! The view is ephemeral. It is persisted only through
//! [`ContextMerger::save_unified_view`], which writes it back as an ordinary
//! branch cache with provenance retained.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::error::Result;
use crate::git::GitInfo;
use crate::models::{BranchCache, Chunk, FileRecord, MergeStats, MergedView, Provenance};
use crate::store::CacheStore;

/// Builds merged views across a stable base branch and the active feature
/// branch.
pub struct ContextMerger {
    store: CacheStore,
    git: GitInfo,
}

impl ContextMerger {
    pub fn new(store: CacheStore, git: GitInfo) -> Self {
        Self { store, git }
    }

    /// Merge two branch caches into a unified, provenance-tagged view.
    ///
    /// Either cache may be missing; merging proceeds with whichever exists.
    /// Both missing yields `Ok(None)`. A corrupted cache file propagates as
    /// [`crate::error::CacheError::CacheCorrupted`].
    pub fn merge_contexts(&self, base: &str, feature: &str) -> Result<Option<MergedView>> {
        let base_cache = self.store.load(base)?;
        let feature_cache = self.store.load(feature)?;

        if base_cache.is_none() && feature_cache.is_none() {
            return Ok(None);
        }

        let changed = self.git.changed_files(base);

        let mut view = merge_caches(base, feature, base_cache, feature_cache, &changed);
        rank_merged(&mut view.chunks);

        debug!(
            base,
            feature,
            chunks = view.chunks.len(),
            modified = view.stats.modified_chunks,
            "built merged view"
        );
        Ok(Some(view))
    }

    /// Persist a merged view as an ordinary branch cache under
    /// `target_branch`, provenance fields and merge stats retained.
    pub fn save_unified_view(&self, view: &MergedView, target_branch: &str) -> Result<()> {
        let mut cache = BranchCache::new(target_branch);
        cache.files = view.files.clone();
        cache.chunks = view.chunks.clone();
        cache.metadata.merge_stats = Some(view.stats.clone());
        self.store.save(target_branch, &cache)
    }
}

fn merge_caches(
    base: &str,
    feature: &str,
    base_cache: Option<BranchCache>,
    feature_cache: Option<BranchCache>,
    changed: &HashSet<String>,
) -> MergedView {
    // Insertion-ordered map: a feature chunk overriding a base chunk keeps
    // the base chunk's position, matching keyed-map insertion semantics.
    let mut order: Vec<Chunk> = Vec::new();
    let mut index: HashMap<(String, usize), usize> = HashMap::new();
    let mut files: BTreeMap<String, FileRecord> = BTreeMap::new();

    if let Some(cache) = base_cache {
        files.extend(cache.files);
        for mut chunk in cache.chunks {
            chunk.provenance = Some(Provenance {
                source_branch: base.to_string(),
                is_base: true,
                is_modified: false,
            });
            insert_or_override(&mut order, &mut index, chunk);
        }
    }

    if let Some(cache) = feature_cache {
        files.extend(cache.files);
        for mut chunk in cache.chunks {
            chunk.provenance = Some(Provenance {
                source_branch: feature.to_string(),
                is_base: false,
                is_modified: changed.contains(&chunk.file_path),
            });
            insert_or_override(&mut order, &mut index, chunk);
        }
    }

    let stats = MergeStats {
        base_chunks: count(&order, |p| p.is_base),
        feature_chunks: count(&order, |p| !p.is_base),
        modified_chunks: count(&order, |p| p.is_modified),
        context_chunks: order.iter().filter(|c| c.is_context).count(),
    };

    MergedView {
        base_branch: base.to_string(),
        feature_branch: feature.to_string(),
        chunks: order,
        files,
        stats,
    }
}

fn insert_or_override(
    order: &mut Vec<Chunk>,
    index: &mut HashMap<(String, usize), usize>,
    chunk: Chunk,
) {
    match index.get(&chunk.key()) {
        Some(&pos) => order[pos] = chunk,
        None => {
            index.insert(chunk.key(), order.len());
            order.push(chunk);
        }
    }
}

fn count(chunks: &[Chunk], pred: impl Fn(&Provenance) -> bool) -> usize {
    chunks
        .iter()
        .filter(|c| c.provenance.as_ref().map(&pred).unwrap_or(false))
        .count()
}

/// Merged ranking order: context chunks first, then chunks from files
/// modified relative to base, then feature-sourced chunks. The sort is
/// stable, so insertion order breaks ties.
fn rank_merged(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        let pa = a.provenance.as_ref();
        let pb = b.provenance.as_ref();
        let modified = |p: Option<&Provenance>| p.map(|p| p.is_modified).unwrap_or(false);
        let from_feature = |p: Option<&Provenance>| p.map(|p| !p.is_base).unwrap_or(false);

        b.is_context
            .cmp(&a.is_context)
            .then(modified(pb).cmp(&modified(pa)))
            .then(from_feature(pb).cmp(&from_feature(pa)))
    });
}

/// Non-destructive query-time re-sort.
///
/// Each chunk gets a transient `+0.1` boost per distinct query term found in
/// its content (case-insensitive substring match). The boost only reorders
/// this returned list; nothing is mutated or persisted.
pub fn optimize_for_query(chunks: &[Chunk], query: &str) -> Vec<Chunk> {
    let query_lower = query.to_lowercase();
    let terms: HashSet<&str> = query_lower.split_whitespace().collect();
    if terms.is_empty() {
        return chunks.to_vec();
    }

    let mut scored: Vec<(f32, Chunk)> = chunks
        .iter()
        .map(|chunk| {
            let content = chunk.content.to_lowercase();
            let hits = terms.iter().filter(|t| content.contains(*t)).count();
            (hits as f32 * 0.1, chunk.clone())
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, c)| c).collect()
}
