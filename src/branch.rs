//! Branch cache lifecycle management.
//!
//! [`BranchCacheManager`] is the single authority for *when* a branch's
//! cache must be discarded or rebuilt. Branch-change detection is a pure
//! function of the `(previous, current)` pair carried by
//! [`BranchOperation::Switch`]; there is no hidden "last known branch"
//! state.
//!
//! Per-branch state machine:
//!
//! ```text
//! Absent ──(index)──▶ Fresh ──(file/commit change)──▶ Stale ──(rebuild)──▶ Fresh
//!    ▲                                                            │
//!    └───────────────────(switch away: cache removed)◀────────────┘
//! ```
//!
//! `Absent` is both the initial and a valid resting state. Branch caches are
//! cheap to rebuild from source, so switching away simply removes the
//! abandoned branch's cache instead of keeping an eviction policy. Trunk
//! branches are the stable baseline and are never removed on switch.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::discovery::ContextDiscovery;
use crate::error::{CacheError, Result};
use crate::fingerprint::fingerprint;
use crate::models::{BranchSummary, CacheMetadata, CacheStatus};
use crate::store::CacheStore;

/// A branch lifecycle event observed by the caller.
#[derive(Debug, Clone)]
pub enum BranchOperation {
    /// The working tree moved from `from` (if known) to `to`.
    Switch { from: Option<String>, to: String },
    /// `source` was merged into `target`.
    Merge { target: String, source: String },
    /// A new branch was created off `base_branch`; its cache is built
    /// lazily on first index or query.
    Create {
        branch_name: String,
        base_branch: String,
    },
}

/// What a lifecycle operation did.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub operation: &'static str,
    pub branch: String,
    pub rebuilt: bool,
    /// Branch whose cache was removed as part of the operation.
    pub removed_branch: Option<String>,
}

/// Outcome of a metadata rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// No relevant files discovered; no cache file was touched, so a
    /// possibly-valid prior cache is never overwritten with an empty one.
    NothingToIndex,
    Rebuilt { file_count: usize },
}

/// Owns the cache lifecycle across branch switch/merge/create events.
pub struct BranchCacheManager {
    store: CacheStore,
    discovery: ContextDiscovery,
    cache_config: CacheConfig,
}

impl BranchCacheManager {
    pub fn new(store: CacheStore, discovery: ContextDiscovery, cache_config: CacheConfig) -> Self {
        Self {
            store,
            discovery,
            cache_config,
        }
    }

    /// Apply a branch lifecycle event, deciding clean vs rebuild vs no-op.
    pub fn handle_branch_operation(&self, op: &BranchOperation) -> Result<OperationResult> {
        match op {
            BranchOperation::Switch { from, to } => self.handle_switch(from.as_deref(), to),
            BranchOperation::Merge { target, source } => {
                // A merge is conservatively assumed to have changed the
                // relevant file set; no fingerprint check.
                info!(target = %target, source = %source, "merge detected; rebuilding target cache metadata");
                let outcome = self.rebuild_context_cache(target)?;
                Ok(OperationResult {
                    operation: "merge",
                    branch: target.clone(),
                    rebuilt: matches!(outcome, RebuildOutcome::Rebuilt { .. }),
                    removed_branch: None,
                })
            }
            BranchOperation::Create {
                branch_name,
                base_branch,
            } => {
                // Pure bookkeeping; the cache is built on first index/query.
                debug!(branch = %branch_name, base = %base_branch, "branch created; cache deferred");
                Ok(OperationResult {
                    operation: "create",
                    branch: branch_name.clone(),
                    rebuilt: false,
                    removed_branch: None,
                })
            }
        }
    }

    fn handle_switch(&self, from: Option<&str>, to: &str) -> Result<OperationResult> {
        let mut removed_branch = None;

        if let Some(from) = from {
            if from != to && !self.cache_config.is_trunk(from) {
                // The abandoned branch is no longer active; removal is
                // best-effort and cheap to undo by re-indexing.
                self.store.remove(from);
                self.store.remove_metadata(from);
                removed_branch = Some(from.to_string());
                info!(branch = from, "removed cache for abandoned branch");
            }
        }

        if self.cache_config.is_trunk(to) {
            debug!(branch = to, "trunk branch; trusting baseline cache as-is");
            return Ok(OperationResult {
                operation: "switch",
                branch: to.to_string(),
                rebuilt: false,
                removed_branch,
            });
        }

        let rebuilt = if self.should_rebuild_for_branch(to)? {
            matches!(
                self.rebuild_context_cache(to)?,
                RebuildOutcome::Rebuilt { .. }
            )
        } else {
            false
        };

        Ok(OperationResult {
            operation: "switch",
            branch: to.to_string(),
            rebuilt,
            removed_branch,
        })
    }

    /// Whether `branch`'s cache metadata is missing or stale.
    ///
    /// True when no metadata exists (or it is unreadable), or when the
    /// fingerprint over the currently discoverable file set differs from the
    /// stored one.
    pub fn should_rebuild_for_branch(&self, branch: &str) -> Result<bool> {
        let stored = match self.store.load_metadata(branch) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return Ok(true),
            Err(CacheError::CacheCorrupted { path, .. }) => {
                warn!(branch, path = %path.display(), "corrupt cache metadata; forcing rebuild");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let files = self.discovery.discover_relevant_files()?;
        let current = fingerprint(&files);
        Ok(current != stored.fingerprint)
    }

    /// Recompute and store fresh cache metadata for `branch`.
    ///
    /// Updates the freshness record only; chunk repopulation is driven by
    /// the indexing pipeline. An empty discovery result returns
    /// [`RebuildOutcome::NothingToIndex`] without touching any file.
    pub fn rebuild_context_cache(&self, branch: &str) -> Result<RebuildOutcome> {
        let files = self.discovery.discover_relevant_files()?;
        if files.is_empty() {
            debug!(branch, "no relevant files discovered; nothing to index");
            return Ok(RebuildOutcome::NothingToIndex);
        }

        let metadata = CacheMetadata {
            branch: branch.to_string(),
            created: Utc::now(),
            fingerprint: fingerprint(&files),
            source_directories: self.discovery.source_directories(),
            indexed_file_count: files.len(),
        };
        self.store.save_metadata(branch, &metadata)?;

        info!(branch, files = files.len(), "rebuilt cache metadata");
        Ok(RebuildOutcome::Rebuilt {
            file_count: files.len(),
        })
    }

    /// Presence/freshness summary for one branch.
    pub fn cache_status(&self, branch: &str) -> Result<CacheStatus> {
        let path = self.store.cache_path(branch);
        let (exists, size_bytes, modified) = match std::fs::metadata(&path) {
            Ok(meta) => (
                true,
                meta.len(),
                meta.modified().ok().map(DateTime::<Utc>::from),
            ),
            Err(_) => (false, 0, None),
        };

        let fresh = exists && !self.should_rebuild_for_branch(branch)?;

        Ok(CacheStatus {
            branch: branch.to_string(),
            exists,
            fresh,
            size_bytes,
            modified,
        })
    }

    /// Every branch with a cache on disk.
    pub fn list_cached_branches(&self) -> Vec<BranchSummary> {
        self.store
            .list_cached()
            .into_iter()
            .map(|(branch, size_bytes, modified)| {
                let indexed_file_count = self
                    .store
                    .load_metadata(&branch)
                    .ok()
                    .flatten()
                    .map(|m| m.indexed_file_count);
                BranchSummary {
                    branch,
                    size_bytes,
                    modified: modified.map(DateTime::<Utc>::from),
                    indexed_file_count,
                }
            })
            .collect()
    }
}
