//! Walks a repository and picks the files worth ingesting.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::exclusion::{relative_path, ExclusionRules};

/// A file that passed every selection rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Relative to the repository root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub language: String,
}

impl CandidateFile {
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// Dotted extension (`.rs`), or empty when the name has none.
    pub fn extension(&self) -> String {
        extension_of(Path::new(self.file_name())).unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("repository root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("repository root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Candidates plus a breakdown of why everything else was dropped.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SelectionReport {
    #[serde(skip)]
    pub files: Vec<CandidateFile>,
    pub skipped_excluded: usize,
    pub skipped_extension: usize,
    pub skipped_size: usize,
    pub skipped_symlinks: usize,
    pub skipped_unreadable: usize,
}

impl SelectionReport {
    pub fn skipped_total(&self) -> usize {
        self.skipped_excluded
            + self.skipped_extension
            + self.skipped_size
            + self.skipped_symlinks
            + self.skipped_unreadable
    }

    pub fn by_language(&self) -> BTreeMap<String, usize> {
        let mut groups = BTreeMap::new();
        for file in &self.files {
            *groups.entry(file.language.clone()).or_insert(0) += 1;
        }
        groups
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

pub struct FileSelector<'a> {
    config: &'a IngestConfig,
}

impl<'a> FileSelector<'a> {
    pub fn new(config: &'a IngestConfig) -> Self {
        Self { config }
    }

    /// Selects candidate files under `root` in traversal order.
    ///
    /// Symlinks are always rejected, then exclusion rules, the extension table and
    /// the size limit are applied in that order; each rejection is counted once.
    /// Entries that cannot be read are counted as unreadable and skipped.
    pub fn select_files(&self, root: &Path) -> Result<SelectionReport, SelectionError> {
        if !root.exists() {
            return Err(SelectionError::MissingRoot(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(SelectionError::NotADirectory(root.to_path_buf()));
        }

        let rules = ExclusionRules::load(root, &self.config.default_exclusions);
        let mut report = SelectionReport::default();

        for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    report.skipped_unreadable += 1;
                    continue;
                }
            };

            if entry.path_is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symlink");
                report.skipped_symlinks += 1;
                continue;
            }
            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let Some(rel) = relative_path(root, path) else {
                report.skipped_excluded += 1;
                continue;
            };

            if rules.is_excluded(&rel) {
                report.skipped_excluded += 1;
                continue;
            }

            let Some(language) = extension_of(path)
                .as_deref()
                .and_then(|ext| self.config.language_for(ext))
            else {
                report.skipped_extension += 1;
                continue;
            };

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Skipping inaccessible file");
                    report.skipped_unreadable += 1;
                    continue;
                }
            };
            if size > self.config.max_file_size_bytes {
                debug!(
                    path = %rel,
                    size,
                    limit = self.config.max_file_size_bytes,
                    "Skipping large file"
                );
                report.skipped_size += 1;
                continue;
            }

            report.files.push(CandidateFile {
                path: path.to_path_buf(),
                relative_path: rel,
                size,
                language: language.to_string(),
            });
        }

        info!(
            root = %root.display(),
            found = report.files.len(),
            "Selected candidate files"
        );
        debug!(
            excluded = report.skipped_excluded,
            unsupported = report.skipped_extension,
            too_large = report.skipped_size,
            symlinks = report.skipped_symlinks,
            unreadable = report.skipped_unreadable,
            "Selection skip breakdown"
        );
        Ok(report)
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}
