use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::transport::RetryPolicy;

/// Run-level settings for one ingestion. Built once at startup and handed by
/// reference to every component; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Minimum spacing between two consecutive upload calls.
    pub request_delay_ms: u64,
    pub retry_attempts: u32,
    pub backoff_multiplier: u32,
    /// Unit of the exponential backoff schedule; one second in production.
    pub backoff_unit_ms: u64,
    pub max_file_size_bytes: u64,
    /// Maps a dotted extension (`.py`) to its language tag.
    pub extensions: BTreeMap<String, String>,
    pub default_exclusions: Vec<String>,
    /// Extensions the store cannot classify; uploaded under a `.txt` name.
    pub text_upload_extensions: BTreeSet<String>,
    pub poll_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub graph_wait_secs: u64,
    pub graph_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 300,
            retry_attempts: 3,
            backoff_multiplier: 2,
            backoff_unit_ms: 1000,
            max_file_size_bytes: 20 * 1024 * 1024,
            extensions: default_extensions(),
            default_exclusions: DEFAULT_EXCLUSIONS.iter().map(|p| p.to_string()).collect(),
            text_upload_extensions: TEXT_UPLOAD_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            poll_timeout_secs: 300,
            poll_interval_secs: 5,
            graph_wait_secs: 30,
            graph_limit: 1000,
        }
    }
}

impl IngestConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn graph_wait(&self) -> Duration {
        Duration::from_secs(self.graph_wait_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            backoff_multiplier: self.backoff_multiplier,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }

    /// Language tag for a dotted extension, if the extension is supported.
    pub fn language_for(&self, extension: &str) -> Option<&str> {
        self.extensions.get(extension).map(String::as_str)
    }

    pub fn trace_loaded(&self) {
        info!(
            request_delay_ms = self.request_delay_ms,
            retry_attempts = self.retry_attempts,
            max_file_size_bytes = self.max_file_size_bytes,
            extensions = self.extensions.len(),
            default_exclusions = self.default_exclusions.len(),
            "Loaded IngestConfig"
        );
        debug!(?self, "IngestConfig loaded (full debug)");
    }
}

const TEXT_UPLOAD_EXTENSIONS: &[&str] = &[
    ".yaml", ".yml", ".toml", ".xml", ".sh", ".bash", ".zsh", ".fish",
];

fn default_extensions() -> BTreeMap<String, String> {
    const TABLE: &[(&str, &str)] = &[
        // Programming languages
        (".py", "python"),
        (".js", "javascript"),
        (".ts", "typescript"),
        (".tsx", "typescript"),
        (".jsx", "javascript"),
        (".java", "java"),
        (".cs", "csharp"),
        (".cpp", "cpp"),
        (".cc", "cpp"),
        (".c", "c"),
        (".h", "c"),
        (".hpp", "cpp"),
        (".go", "go"),
        (".rs", "rust"),
        (".rb", "ruby"),
        (".php", "php"),
        (".swift", "swift"),
        (".kt", "kotlin"),
        (".scala", "scala"),
        (".r", "r"),
        (".m", "objective-c"),
        // Web and markup
        (".html", "html"),
        (".css", "css"),
        (".scss", "scss"),
        (".sass", "sass"),
        (".vue", "vue"),
        // Shell and config
        (".sh", "shell"),
        (".bash", "shell"),
        (".zsh", "shell"),
        (".fish", "shell"),
        (".yaml", "txt"),
        (".yml", "txt"),
        (".toml", "txt"),
        (".json", "json"),
        (".xml", "txt"),
        // Documentation
        (".md", "markdown"),
        (".rst", "restructuredtext"),
        (".txt", "text"),
        // Images
        (".png", "image"),
        (".jpg", "image"),
        (".jpeg", "image"),
        (".gif", "image"),
        (".svg", "image"),
        (".webp", "image"),
        // Diagrams
        (".puml", "plantuml"),
        (".plantuml", "plantuml"),
    ];
    TABLE
        .iter()
        .map(|(ext, lang)| (ext.to_string(), lang.to_string()))
        .collect()
}

/// Built-in exclusion patterns, grouped by ecosystem.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    // Version control
    ".git", ".svn", ".hg", ".bzr",
    // Python
    "__pycache__", "*.pyc", "*.pyo", "*.pyd", ".pytest_cache", ".mypy_cache", ".tox",
    ".coverage", "htmlcov", "*.egg-info", ".eggs", "venv", "env", ".env", ".venv",
    "pip-log.txt", "poetry.lock", "Pipfile.lock", "pdm.lock",
    // JavaScript / Node.js
    "node_modules", "bower_components", "package-lock.json", "yarn.lock", "pnpm-lock.yaml",
    "bun.lockb", ".next", ".nuxt", ".parcel-cache", ".cache", "npm-debug.log*",
    "yarn-debug.log*", "yarn-error.log*",
    // Java
    "target", ".gradle", ".mvn", "*.class", "*.jar", "*.war", "*.ear",
    // .NET
    "bin", "obj", "packages", "packages.lock.json", ".vs", "*.suo", "*.user",
    // Go
    "vendor", "go.sum", "go.work.sum",
    // Rust
    "Cargo.lock",
    // Ruby
    ".bundle", "vendor/bundle", "Gemfile.lock",
    // PHP
    "composer.lock", "composer.phar",
    // Swift, Dart, Elixir
    "Package.resolved", "pubspec.lock", "mix.lock",
    // Build output
    "dist", "build", "out", "release", "Debug", "Release",
    // Coverage
    "coverage", ".nyc_output",
    // Logs and temp files
    "logs", "*.log", "tmp", "temp", "*.tmp", "*.temp",
    // Editors and IDEs
    ".vscode", ".idea", "*.iml", ".sublime-workspace", ".sublime-project", "*.swp", "*.swo",
    "*~", ".project", ".classpath", ".settings",
    // OS artifacts
    ".DS_Store", "Thumbs.db", "desktop.ini",
];
