//! Git porcelain: current branch name and changed-file listing.
//!
//! The cache core needs exactly two facts from git: which branch is active,
//! and which files differ between a base branch and the working tree. Both
//! are read through the `git` binary. A missing repository (or missing git)
//! degrades to "no branch" / "no changes" so branch-scoped behavior becomes
//! a no-op instead of an error.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

use crate::error::{CacheError, Result};

/// Read-only view of the repository containing `root`.
#[derive(Debug, Clone)]
pub struct GitInfo {
    root: PathBuf,
}

impl GitInfo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn is_repo(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// The current branch name, or `None` outside a repository or in
    /// detached-HEAD state.
    pub fn current_branch(&self) -> Result<Option<String>> {
        if !self.is_repo() {
            return Ok(None);
        }

        let output = run_git(&self.root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = output.trim().to_string();
        if branch.is_empty() || branch == "HEAD" {
            return Ok(None);
        }
        Ok(Some(branch))
    }

    /// Paths (repo-relative) that differ between `base` and the current
    /// working tree, including uncommitted edits.
    ///
    /// Git failure degrades to an empty set with a warning: merge views then
    /// simply carry no `is_modified` tags rather than failing the query.
    pub fn changed_files(&self, base: &str) -> HashSet<String> {
        if !self.is_repo() {
            return HashSet::new();
        }

        match run_git(&self.root, &["diff", "--name-only", base]) {
            Ok(output) => output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(base, error = %e, "git diff failed; treating changed set as empty");
                HashSet::new()
            }
        }
    }
}

fn run_git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .map_err(|e| CacheError::GitUnavailable(format!("failed to execute git: {}", e)))?;

    if !output.status.success() {
        return Err(CacheError::GitUnavailable(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| CacheError::GitUnavailable(format!("invalid UTF-8 from git: {}", e)))
}
