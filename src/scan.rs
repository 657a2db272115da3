//! Candidate file discovery

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid include pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}

fn build_matcher(include: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    let patterns: Vec<&str> = if include.is_empty() {
        vec!["**/*"]
    } else {
        include.iter().map(String::as_str).collect()
    };
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ScanError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ScanError::InvalidPattern {
        pattern: include.join(","),
        source,
    })
}

/// Files under `root` whose path relative to `root` matches any `include`
/// pattern (everything when empty). Hidden entries are skipped. Sorted.
pub fn collect_files(root: &Path, include: &[String]) -> Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let matcher = build_matcher(include)?;

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            matcher.is_match(rel)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();

    debug!(root = %root.display(), matches = files.len(), "Scanned for files");
    Ok(files)
}
