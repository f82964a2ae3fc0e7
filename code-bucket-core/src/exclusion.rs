//! Glob-based exclusion rules: built-in defaults plus the repository's `.gitignore`.
//!
//! Matching is simpler than git: every pattern is tested against the
//! whole relative path, against `**/<pattern>`, and against each path segment. Any
//! hit excludes the path. Negation lines (`!pattern`) are skipped and anchoring is
//! not interpreted.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const IGNORE_FILE: &str = ".gitignore";

#[derive(Debug, Clone)]
pub struct ExclusionRules {
    root: PathBuf,
    patterns: Vec<String>,
    whole_path: GlobSet,
    segment: GlobSet,
}

impl ExclusionRules {
    /// Builds the rule set for `root`: `defaults` first, then the non-comment,
    /// non-blank lines of `<root>/.gitignore` if it exists.
    pub fn load(root: &Path, defaults: &[String]) -> Self {
        let mut patterns = defaults.to_vec();
        let ignore_path = root.join(IGNORE_FILE);
        match fs::read(&ignore_path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let before = patterns.len();
                patterns.extend(parse_ignore_file(&text));
                debug!(
                    path = %ignore_path.display(),
                    added = patterns.len() - before,
                    total = patterns.len(),
                    "Loaded repository ignore rules"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(error = ?e, path = %ignore_path.display(), "Failed to read ignore file, using defaults only");
            }
        }
        Self::from_patterns(root, patterns)
    }

    pub fn from_patterns(root: &Path, patterns: Vec<String>) -> Self {
        let mut whole_path = GlobSetBuilder::new();
        let mut segment = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let direct = GlobBuilder::new(&pattern).literal_separator(false).build();
            let anywhere = GlobBuilder::new(&format!("**/{pattern}"))
                .literal_separator(false)
                .build();
            match (direct, anywhere) {
                (Ok(direct), Ok(anywhere)) => {
                    whole_path.add(direct.clone());
                    whole_path.add(anywhere);
                    segment.add(direct);
                    kept.push(pattern);
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(pattern = %pattern, error = %e, "Skipping invalid exclusion pattern");
                }
            }
        }

        Self {
            root: root.to_path_buf(),
            whole_path: build_or_empty(whole_path),
            segment: build_or_empty(segment),
            patterns: kept,
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `relative_path` uses `/` separators, relative to the repository root.
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        if self.whole_path.is_match(relative_path) {
            return true;
        }
        relative_path
            .split('/')
            .filter(|part| !part.is_empty())
            .any(|part| self.segment.is_match(part))
    }

    /// Like [`is_excluded`](Self::is_excluded) for a filesystem path. Paths that
    /// do not live under the root are always excluded.
    pub fn is_excluded_path(&self, path: &Path) -> bool {
        match relative_path(&self.root, path) {
            Some(rel) => self.is_excluded(&rel),
            None => true,
        }
    }
}

/// Repository-relative path with `/` separators, or `None` when `path` is not
/// below `root` (or escapes it through `..`).
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn parse_ignore_file(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| line.trim_start_matches('/').trim_end_matches('/'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

fn build_or_empty(builder: GlobSetBuilder) -> GlobSet {
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to compile exclusion rules, nothing will be excluded by pattern");
        GlobSet::empty()
    })
}
