///
/// This module implements the CLI interface for code-bucket: command parsing,
/// credential resolution and the process exit contract.
///
/// All pipeline logic (selection, metadata, identity, retries, orchestration) lives in
/// the [`code-bucket-core`] crate. This module only wires it to git, the R2R client
/// and the terminal.
///
/// ## Features
/// - [`Cli`] defines every user-facing option and subcommand.
/// - `ingest` clones or updates a repository and loads it into a collection.
/// - `scan` runs file selection on a local directory without touching the network.
/// - [`run`] is the async entrypoint shared by `main` and the integration tests; it
///   returns the process exit code.
///
/// ## Exit codes
/// `0` when at least 90% of found files were uploaded, `1` for at least 50% or a
/// fatal error, `2` below that, `130` when interrupted.
///
/// [`code-bucket-core`]: ../../code_bucket_core/
use crate::load_config::{load_config, CliConfig, ENV_EMAIL, ENV_PASSWORD};
use crate::upload::R2rClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use code_bucket_core::contract::RepositorySource;
use code_bucket_core::error::IngestError;
use code_bucket_core::ingest::{ingest_repository, IngestRequest, RunOutcome, RunStatistics};
use code_bucket_core::select::{FileSelector, SelectionReport};
use code_bucket_core::vcs::GitCli;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// CLI for code-bucket: load git repositories into an R2R document store.
#[derive(Parser)]
#[clap(
    name = "code-bucket",
    version,
    about = "Load git repositories into an R2R document store for code search and RAG"
)]
pub struct Cli {
    /// Log at debug level
    #[clap(long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clone (or reuse) a repository and ingest its code files into a collection
    Ingest {
        /// Git repository URL (https:// or git@)
        repo_url: String,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Collection name (default: repo-<repository name>)
        #[clap(long)]
        collection: Option<String>,
        /// Branch to clone (default: remote HEAD)
        #[clap(long)]
        branch: Option<String>,
        /// Pull the latest changes if the repository is already cloned
        #[clap(long)]
        update: bool,
        /// Extract a knowledge graph after ingestion
        #[clap(long)]
        extract_graph: bool,
        /// Account email (default: $R2R_EMAIL)
        #[clap(long)]
        email: Option<String>,
        /// Account password (default: $R2R_PASSWORD)
        #[clap(long)]
        password: Option<String>,
        /// Write run statistics as JSON to this file
        #[clap(long)]
        report: Option<PathBuf>,
    },
    /// Show which files of a local directory would be ingested
    Scan {
        /// Directory to scan
        path: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Async CLI entrypoint for integration tests and main(). Returns the exit code.
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<u8> {
    match cli.command {
        Commands::Ingest {
            repo_url,
            config,
            collection,
            branch,
            update,
            extract_graph,
            email,
            password,
            report,
        } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "ingest", repo_url = %repo_url, "Starting ingestion");
            let Some(stats) = ingest(
                &config,
                IngestArgs {
                    repo_url,
                    collection,
                    branch,
                    update,
                    extract_graph,
                    email,
                    password,
                },
                &cancel,
            )
            .await?
            else {
                tracing::warn!(command = "ingest", "Interrupted before ingestion started");
                println!("Interrupted before ingestion started");
                return Ok(RunOutcome::Interrupted.exit_code());
            };

            if let Some(path) = report {
                write_report(&path, &stats)?;
            }
            print_statistics(&stats);

            let outcome = stats.outcome();
            tracing::info!(command = "ingest", ?outcome, "Ingestion finished");
            Ok(outcome.exit_code())
        }
        Commands::Scan { path, config } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "scan", path = %path.display(), "Scanning directory");
            let report = FileSelector::new(&config.ingest)
                .select_files(&path)
                .with_context(|| format!("Failed to scan {}", path.display()))?;
            print_selection(&path, &report);
            Ok(0)
        }
    }
}

struct IngestArgs {
    repo_url: String,
    collection: Option<String>,
    branch: Option<String>,
    update: bool,
    extract_graph: bool,
    email: Option<String>,
    password: Option<String>,
}

/// Logs in, syncs the checkout and runs the pipeline. Returns `None` when `cancel`
/// fires before the pipeline starts.
async fn ingest(
    config: &CliConfig,
    args: IngestArgs,
    cancel: &CancellationToken,
) -> Result<Option<RunStatistics>> {
    let email = args
        .email
        .or_else(|| config.store.email.clone())
        .with_context(|| format!("No account email: pass --email or set {ENV_EMAIL}"))?;
    let password = args
        .password
        .or_else(|| config.store.password.clone())
        .with_context(|| format!("No account password: pass --password or set {ENV_PASSWORD}"))?;

    let client = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        result = R2rClient::login(
            &config.store.api_url,
            &email,
            &password,
            config.ingest.retry_policy(),
        ) => result.map_err(IngestError::Authentication)?,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        result = client.health() => match result {
            Ok(status) => tracing::debug!(status = %status, "Document store is healthy"),
            Err(e) => tracing::warn!(error = %e, "Document store health check failed, continuing"),
        },
    }

    let git = GitCli::new(&config.repos_dir);
    let synced = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        result = git.sync(&args.repo_url, args.branch, args.update) => match result {
            Ok(synced) => synced,
            Err(_) if cancel.is_cancelled() => return Ok(None),
            Err(e) => return Err(IngestError::from(e).into()),
        },
    };
    let commit = git
        .commit_info(&synced.local_path)
        .map_err(IngestError::from)?;
    tracing::info!(
        repo = %synced.info.name,
        path = %synced.local_path.display(),
        commit = %commit.short_hash,
        message = %commit.message,
        updated = synced.updated,
        "Repository ready"
    );

    let request = IngestRequest {
        repo: synced.info,
        local_path: synced.local_path,
        commit,
        collection_name: args.collection,
        extract_graph: args.extract_graph,
    };
    let stats = ingest_repository(&config.ingest, &client, &request, cancel).await?;
    Ok(Some(stats))
}

fn write_report(path: &Path, stats: &RunStatistics) -> Result<()> {
    let json = serde_json::to_string_pretty(stats).context("Failed to encode run statistics")?;
    fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote run report");
    Ok(())
}

fn print_statistics(stats: &RunStatistics) {
    println!("Repository:      {}", stats.repo_name);
    println!(
        "Collection:      {} ({})",
        stats.collection_name,
        stats.collection_id.as_deref().unwrap_or("-")
    );
    println!("Files found:     {}", stats.files_found);
    println!("Files uploaded:  {}", stats.files_uploaded);
    println!("Files failed:    {}", stats.files_failed);
    println!(
        "Ingestion:       {} success, {} failed, {} pending{}",
        stats.ingestion.success,
        stats.ingestion.failed,
        stats.ingestion.pending,
        if stats.ingestion.timed_out { " (timed out)" } else { "" }
    );
    if stats.kg_entities > 0 || stats.kg_relationships > 0 {
        println!(
            "Knowledge graph: {} entities, {} relationships",
            stats.kg_entities, stats.kg_relationships
        );
    }
    println!("Duration:        {:.1}s", stats.duration_secs);
    if stats.interrupted {
        println!("Interrupted before completion");
    }
}

fn print_selection(root: &Path, report: &SelectionReport) {
    println!(
        "{}: {} files selected ({} bytes)",
        root.display(),
        report.files.len(),
        report.total_bytes()
    );
    let mut by_language: Vec<(String, usize)> = report.by_language().into_iter().collect();
    by_language.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (language, count) in by_language {
        println!("  {language}: {count}");
    }
    println!(
        "Skipped: {} excluded, {} unsupported, {} too large, {} symlinks, {} unreadable",
        report.skipped_excluded,
        report.skipped_extension,
        report.skipped_size,
        report.skipped_symlinks,
        report.skipped_unreadable
    );
}
