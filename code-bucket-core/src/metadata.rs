//! Per-file descriptive metadata: language, module path, imports and line counts.
//!
//! Everything here is line-oriented and best-effort. Imports come from a table of
//! per-language regular expressions applied to each trimmed line after comment
//! lines are dropped; multi-line import statements, string contents and aliasing
//! are not understood. Line statistics classify a line by its leading token only,
//! so block comments count as code after their first line.

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::contract::{CommitInfo, RepoInfo};
use crate::select::CandidateFile;

/// Value of the `source` metadata field for every document produced here.
pub const SOURCE_TAG: &str = "codebase";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub lines_total: usize,
    pub lines_code: usize,
    pub lines_comment: usize,
    pub lines_blank: usize,
}

/// Metadata attached to an uploaded document. Field names are the keys the
/// document store sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub source: String,
    pub language: String,
    pub module: String,
    pub file_path: String,
    pub file_name: String,
    pub extension: String,
    pub repo_name: String,
    pub repo_url: String,
    pub commit_hash: String,
    pub commit_hash_short: String,
    pub commit_message: String,
    pub commit_author: String,
    pub commit_date: String,
    pub imports: Vec<String>,
    pub import_count: usize,
    pub packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(flatten)]
    pub stats: FileStats,
}

/// Line rules for one language.
#[derive(Debug, Clone)]
pub struct LanguageRules {
    pub comment_prefixes: Vec<String>,
    pub import_patterns: Vec<Regex>,
}

impl LanguageRules {
    fn is_comment(&self, trimmed: &str) -> bool {
        self.comment_prefixes
            .iter()
            .any(|prefix| trimmed.starts_with(prefix.as_str()))
    }
}

/// Language tag → rules. Languages without an entry fall back to `#` and `//`
/// comments and no import extraction.
#[derive(Debug, Clone)]
pub struct RuleTable {
    languages: HashMap<String, LanguageRules>,
    fallback: LanguageRules,
}

const HASH: &[&str] = &["#"];
const SLASH: &[&str] = &["//", "/*"];
const HASH_AND_SLASH: &[&str] = &["#", "//", "/*"];
const MARKUP: &[&str] = &["<!--"];
const CSS: &[&str] = &["/*"];

const JS_IMPORTS: &[&str] = &[
    r#"^import\s+.*\s+from\s+['"]([^'"]+)['"]"#,
    r#"^import\s+['"]([^'"]+)['"]"#,
    r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#,
];
const JVM_IMPORTS: &[&str] = &[r"^import\s+(?:static\s+)?([\w.]+)"];
const C_IMPORTS: &[&str] = &[r#"^#\s*(?:include|import)\s*[<"]([^>"]+)[>"]"#];

const BUILTIN: &[(&str, &[&str], &[&str])] = &[
    (
        "python",
        HASH,
        &[r"^import\s+([\w.]+)", r"^from\s+([\w.]+)\s+import"],
    ),
    ("javascript", SLASH, JS_IMPORTS),
    ("typescript", SLASH, JS_IMPORTS),
    ("vue", &["//", "/*", "<!--"], JS_IMPORTS),
    ("java", SLASH, JVM_IMPORTS),
    ("kotlin", SLASH, JVM_IMPORTS),
    ("scala", SLASH, JVM_IMPORTS),
    (
        "go",
        SLASH,
        &[
            r#"^import\s+"([^"]+)""#,
            r#"^import\s+\w+\s+"([^"]+)""#,
            r#"^import\s+\(\s*"([^"]+)""#,
        ],
    ),
    (
        "rust",
        SLASH,
        &[
            r"^(?:pub(?:\([\w:]+\))?\s+)?use\s+([\w:]+)",
            r"^extern\s+crate\s+(\w+)",
        ],
    ),
    ("c", SLASH, C_IMPORTS),
    ("cpp", SLASH, C_IMPORTS),
    ("objective-c", SLASH, C_IMPORTS),
    ("csharp", SLASH, &[r"^using\s+(?:static\s+)?([\w.]+)\s*;"]),
    ("swift", SLASH, &[r"^import\s+(\w+)"]),
    (
        "ruby",
        HASH,
        &[r#"^require(?:_relative)?\s*\(?\s*['"]([^'"]+)['"]"#],
    ),
    (
        "php",
        HASH_AND_SLASH,
        &[
            r#"^(?:require|include)(?:_once)?\s*\(?\s*['"]([^'"]+)['"]"#,
            r"^use\s+([\w\\]+)",
        ],
    ),
    ("shell", HASH, &[r"^(?:source|\.)\s+(\S+)"]),
    ("r", HASH, &[r"^(?:library|require)\(\s*([\w.]+)\s*\)"]),
    ("txt", HASH, &[]),
    ("css", CSS, &[]),
    ("scss", SLASH, &[r#"^@(?:import|use)\s+['"]([^'"]+)['"]"#]),
    ("sass", SLASH, &[r#"^@(?:import|use)\s+['"]?([^'";\s]+)"#]),
    ("html", MARKUP, &[]),
    ("markdown", MARKUP, &[]),
];

impl RuleTable {
    pub fn builtin() -> Self {
        let mut table = Self {
            languages: HashMap::new(),
            fallback: LanguageRules {
                comment_prefixes: vec!["#".into(), "//".into()],
                import_patterns: Vec::new(),
            },
        };
        for (language, comments, imports) in BUILTIN {
            table.insert(language, comments, imports);
        }
        table
    }

    /// Adds or replaces the rules for `language`. Patterns that fail to compile
    /// are logged and dropped; the first capture group is the imported name.
    pub fn insert(&mut self, language: &str, comment_prefixes: &[&str], import_patterns: &[&str]) {
        let import_patterns = import_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(language, pattern, error = %e, "Dropping invalid import pattern");
                    None
                }
            })
            .collect();
        self.languages.insert(
            language.to_string(),
            LanguageRules {
                comment_prefixes: comment_prefixes.iter().map(|p| p.to_string()).collect(),
                import_patterns,
            },
        );
    }

    pub fn rules_for(&self, language: &str) -> &LanguageRules {
        self.languages.get(language).unwrap_or(&self.fallback)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    rules: RuleTable,
}

impl MetadataBuilder {
    pub fn new(rules: RuleTable) -> Self {
        Self { rules }
    }

    /// Sorted, de-duplicated import identifiers found in `content`.
    pub fn extract_imports(&self, content: &str, language: &str) -> Vec<String> {
        let rules = self.rules.rules_for(language);
        if rules.import_patterns.is_empty() {
            return Vec::new();
        }

        let mut imports = BTreeSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || rules.is_comment(line) {
                continue;
            }
            for pattern in &rules.import_patterns {
                if let Some(name) = pattern.captures(line).and_then(|c| c.get(1)) {
                    let name = name.as_str().trim_end_matches(':');
                    if !name.is_empty() {
                        imports.insert(name.to_string());
                    }
                }
            }
        }
        imports.into_iter().collect()
    }

    pub fn extract_file_stats(&self, content: &str, language: &str) -> FileStats {
        let rules = self.rules.rules_for(language);
        let mut stats = FileStats::default();
        for line in content.lines() {
            stats.lines_total += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                stats.lines_blank += 1;
            } else if rules.is_comment(trimmed) {
                stats.lines_comment += 1;
            } else {
                stats.lines_code += 1;
            }
        }
        stats
    }

    /// Reads `file` and derives its metadata. A read failure degrades to empty
    /// imports and zeroed statistics rather than failing the file.
    pub fn build_metadata(
        &self,
        file: &CandidateFile,
        repo: &RepoInfo,
        commit: &CommitInfo,
    ) -> FileMetadata {
        match fs::read(&file.path) {
            Ok(bytes) => self.build_metadata_from_content(file, &bytes, repo, commit),
            Err(e) => {
                debug!(error = ?e, path = %file.relative_path, "Failed to read file for metadata, using empty fields");
                self.assemble(file, None, repo, commit)
            }
        }
    }

    /// As [`build_metadata`](Self::build_metadata) for content already in memory.
    pub fn build_metadata_from_content(
        &self,
        file: &CandidateFile,
        content: &[u8],
        repo: &RepoInfo,
        commit: &CommitInfo,
    ) -> FileMetadata {
        self.assemble(file, Some(content), repo, commit)
    }

    fn assemble(
        &self,
        file: &CandidateFile,
        content: Option<&[u8]>,
        repo: &RepoInfo,
        commit: &CommitInfo,
    ) -> FileMetadata {
        let (imports, stats, content_hash) = match content {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                (
                    self.extract_imports(&text, &file.language),
                    self.extract_file_stats(&text, &file.language),
                    Some(sha256_hex(bytes)),
                )
            }
            None => (Vec::new(), FileStats::default(), None),
        };

        FileMetadata {
            source: SOURCE_TAG.to_string(),
            language: file.language.clone(),
            module: extract_module_name(&file.relative_path),
            file_path: file.relative_path.clone(),
            file_name: file.file_name().to_string(),
            extension: file.extension(),
            repo_name: repo.name.clone(),
            repo_url: repo.url.clone(),
            commit_hash: commit.hash.clone(),
            commit_hash_short: commit.short_hash.clone(),
            commit_message: commit.message.clone(),
            commit_author: commit.author_name.clone(),
            commit_date: commit.date.clone(),
            import_count: imports.len(),
            packages: top_level_packages(&imports),
            imports,
            content_hash,
            stats,
        }
    }
}

/// `src/services/auth.py` → `src.services.auth`. Leading dots are stripped, so
/// `.github/ci.yml` becomes `github.ci`.
pub fn extract_module_name(relative_path: &str) -> String {
    let without_ext = Path::new(relative_path).with_extension("");
    without_ext
        .to_string_lossy()
        .replace(['/', '\\'], ".")
        .trim_start_matches('.')
        .to_string()
}

/// First segment of each import (`fastapi.routing` → `fastapi`, `std::io` → `std`).
pub fn top_level_packages(imports: &[String]) -> Vec<String> {
    imports
        .iter()
        .filter_map(|import| {
            let import = import.trim_start_matches(['.', '/']);
            import
                .split(|c| c == '.' || c == '/' || c == ':' || c == '\\')
                .find(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Name to upload `file_name` under: extensions the store cannot classify are
/// swapped for `.txt`; the true extension stays in the metadata.
pub fn upload_file_name(file_name: &str, text_extensions: &BTreeSet<String>) -> String {
    let path = Path::new(file_name);
    match path.extension() {
        Some(ext) if text_extensions.contains(&format!(".{}", ext.to_string_lossy())) => {
            format!("{}.txt", path.with_extension("").to_string_lossy())
        }
        _ => file_name.to_string(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    fn repo() -> RepoInfo {
        RepoInfo {
            name: "demo".into(),
            url: "https://example.com/acme/demo.git".into(),
        }
    }

    fn commit() -> CommitInfo {
        CommitInfo {
            hash: "0123456789abcdef0123456789abcdef01234567".into(),
            short_hash: "0123456".into(),
            message: "Initial import".into(),
            author_name: "Dev".into(),
            author_email: "dev@example.com".into(),
            date: "2024-01-01 12:00:00 +0000".into(),
        }
    }

    fn candidate(path: PathBuf, rel: &str, language: &str) -> CandidateFile {
        CandidateFile {
            path,
            relative_path: rel.into(),
            size: 0,
            language: language.into(),
        }
    }

    #[test]
    fn python_imports_skip_comments_and_sort() {
        let imports = builder().extract_imports(
            "from pkg.sub import x\nimport os\n# import ignored",
            "python",
        );
        assert_eq!(imports, vec!["os".to_string(), "pkg.sub".to_string()]);
    }

    #[test]
    fn imports_are_unique() {
        let imports = builder().extract_imports("import os\nimport os\n    import os\n", "python");
        assert_eq!(imports, vec!["os".to_string()]);
    }

    #[test]
    fn javascript_imports_and_requires() {
        let src = r#"
import React from "react";
import './styles.css';
// import hidden from "hidden";
const fs = require('fs');
"#;
        let imports = builder().extract_imports(src, "javascript");
        assert_eq!(imports, vec!["./styles.css", "fs", "react"]);
    }

    #[test]
    fn c_includes_are_not_mistaken_for_comments() {
        let src = "#include <stdio.h>\n#include \"local.h\"\n// #include <hidden.h>\n";
        let imports = builder().extract_imports(src, "c");
        assert_eq!(imports, vec!["local.h", "stdio.h"]);
    }

    #[test]
    fn rust_use_paths() {
        let src = "use std::collections::HashMap;\npub use crate::config::{A, B};\nextern crate serde;\n";
        let imports = builder().extract_imports(src, "rust");
        assert_eq!(
            imports,
            vec!["crate::config", "serde", "std::collections::HashMap"]
        );
    }

    #[test]
    fn go_single_line_imports_only() {
        let src = "import \"fmt\"\nimport (\n\t\"os\"\n)\nimport log \"github.com/sirupsen/logrus\"\n";
        let imports = builder().extract_imports(src, "go");
        // multi-line import blocks are a known limitation
        assert_eq!(imports, vec!["fmt", "github.com/sirupsen/logrus"]);
    }

    #[test]
    fn unknown_language_has_no_imports() {
        assert!(builder().extract_imports("import os", "plantuml").is_empty());
    }

    #[test]
    fn custom_rules_can_be_added() {
        let mut rules = RuleTable::builtin();
        rules.insert("elixir", &["#"], &[r"^alias\s+([\w.]+)"]);
        let builder = MetadataBuilder::new(rules);
        assert_eq!(
            builder.extract_imports("alias MyApp.Repo\n# alias Hidden\n", "elixir"),
            vec!["MyApp.Repo"]
        );
    }

    #[test]
    fn line_stats_by_leading_token() {
        let src = "# header\n\nimport os\n\n    # indented comment\nprint(os.name)\n";
        let stats = builder().extract_file_stats(src, "python");
        assert_eq!(
            stats,
            FileStats {
                lines_total: 6,
                lines_code: 2,
                lines_comment: 2,
                lines_blank: 2,
            }
        );
    }

    #[test]
    fn module_names_from_relative_paths() {
        assert_eq!(extract_module_name("src/services/auth.py"), "src.services.auth");
        assert_eq!(extract_module_name("lib/utils.js"), "lib.utils");
        assert_eq!(extract_module_name("auth.py"), "auth");
        assert_eq!(extract_module_name(".github/workflows/ci.yml"), "github.workflows.ci");
    }

    #[test]
    fn packages_are_first_segments() {
        let imports = vec![
            "fastapi.routing".to_string(),
            "pydantic".to_string(),
            "std::io".to_string(),
            "./local".to_string(),
        ];
        assert_eq!(
            top_level_packages(&imports),
            vec!["fastapi", "local", "pydantic", "std"]
        );
    }

    #[test]
    fn unclassifiable_extensions_upload_as_text() {
        let text = crate::config::IngestConfig::default().text_upload_extensions;
        assert_eq!(upload_file_name("config.yaml", &text), "config.txt");
        assert_eq!(upload_file_name("deploy.sh", &text), "deploy.txt");
        assert_eq!(upload_file_name("main.py", &text), "main.py");
        assert_eq!(upload_file_name("Dockerfile", &text), "Dockerfile");
    }

    #[test]
    fn build_metadata_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.py");
        fs::write(&path, "import os\n\n# note\nprint(os)\n").unwrap();

        let file = candidate(path, "src/app.py", "python");
        let meta = builder().build_metadata(&file, &repo(), &commit());

        assert_eq!(meta.source, "codebase");
        assert_eq!(meta.module, "src.app");
        assert_eq!(meta.file_name, "app.py");
        assert_eq!(meta.extension, ".py");
        assert_eq!(meta.imports, vec!["os"]);
        assert_eq!(meta.import_count, 1);
        assert_eq!(meta.commit_hash_short, "0123456");
        assert_eq!(meta.stats.lines_total, 4);
        assert_eq!(
            meta.content_hash.as_deref().map(str::len),
            Some(64),
            "sha256 hex digest expected"
        );

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["lines_code"], 2);
        assert_eq!(json["repo_name"], "demo");
    }

    #[test]
    fn unreadable_file_degrades_to_empty_fields() {
        let dir = tempdir().unwrap();
        let file = candidate(dir.path().join("gone.py"), "gone.py", "python");
        let meta = builder().build_metadata(&file, &repo(), &commit());

        assert!(meta.imports.is_empty());
        assert_eq!(meta.stats, FileStats::default());
        assert_eq!(meta.content_hash, None);
        assert_eq!(meta.module, "gone");
    }
}
