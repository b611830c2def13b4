//! Context-file discovery.
//!
//! Walks the configured source directories, applies include/exclude globs,
//! and classifies every surviving file with a context type and priority
//! taken from its source directory. The resulting [`FileInfo`] list feeds
//! both fingerprinting (staleness detection) and the indexing pipeline.
//!
//! Per-file failures (unreadable metadata, broken symlinks) are warned and
//! skipped; one bad file never aborts discovery of the rest.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::models::FileInfo;

/// Discovers the relevant file set under the configured source directories.
#[derive(Debug, Clone)]
pub struct ContextDiscovery {
    config: DiscoveryConfig,
}

impl ContextDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Root the discovered paths are relative to.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// The source directories as display strings, for cache metadata.
    pub fn source_directories(&self) -> Vec<String> {
        self.config
            .sources
            .iter()
            .map(|s| s.dir.display().to_string())
            .collect()
    }

    /// Walk every configured source directory and return the matching files,
    /// sorted by path for deterministic downstream processing.
    pub fn discover_relevant_files(&self) -> Result<Vec<FileInfo>> {
        let include_set = build_globset(&self.config.include_globs);

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(self.config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes);

        let mut files = Vec::new();

        for source in &self.config.sources {
            let dir = self.config.root.join(&source.dir);
            if !dir.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&dir) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable directory entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                let rel = path
                    .strip_prefix(&self.config.root)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .replace('\\', "/");

                if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping file with unreadable metadata");
                        continue;
                    }
                };

                files.push(FileInfo {
                    path: rel,
                    size: metadata.len(),
                    modified_time: modified_millis(&metadata, path),
                    context_type: source.context_type.clone(),
                    priority: source.priority,
                    is_context: source.is_context,
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

fn modified_millis(metadata: &std::fs::Metadata, path: &Path) -> i64 {
    match metadata.modified() {
        Ok(t) => t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mtime unavailable; recording 0");
            0
        }
    }
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "ignoring invalid glob pattern"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "glob set failed to compile; matching nothing");
        GlobSet::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceDirConfig;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn discovery_for(root: &Path) -> ContextDiscovery {
        ContextDiscovery::new(DiscoveryConfig {
            root: root.to_path_buf(),
            sources: vec![
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
            ],
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
        })
    }

    #[test]
    fn test_discovers_and_classifies_by_source_dir() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        fs::create_dir_all(tmp.path().join("specs")).unwrap();
        fs::write(tmp.path().join("docs/guide.md"), "# Guide").unwrap();
        fs::write(tmp.path().join("specs/cache.md"), "# Cache spec").unwrap();

        let files = discovery_for(tmp.path()).discover_relevant_files().unwrap();
        assert_eq!(files.len(), 2);

        // Sorted by path: docs/ before specs/.
        assert_eq!(files[0].path, "docs/guide.md");
        assert_eq!(files[0].context_type, "documentation");
        assert_eq!(files[0].priority, 50);
        assert_eq!(files[1].path, "specs/cache.md");
        assert_eq!(files[1].context_type, "specification");
        assert_eq!(files[1].priority, 80);
        assert!(files[1].size > 0);
        assert!(files[1].modified_time > 0);
    }

    #[test]
    fn test_include_and_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs/drafts")).unwrap();
        fs::write(tmp.path().join("docs/keep.md"), "keep").unwrap();
        fs::write(tmp.path().join("docs/skip.rs"), "skip").unwrap();
        fs::write(tmp.path().join("docs/drafts/wip.md"), "wip").unwrap();

        let files = discovery_for(tmp.path()).discover_relevant_files().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["docs/keep.md"]);
    }

    #[test]
    fn test_missing_source_dir_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let files = discovery_for(tmp.path()).discover_relevant_files().unwrap();
        assert!(files.is_empty());
    }
}
