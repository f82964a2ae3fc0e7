//! Ingestion pipeline: takes a repository already on disk and loads it into a
//! document store collection.
//!
//! One run is a fixed sequence of phases, each finishing before the next starts:
//!
//! 1. **Select**: walk the checkout with [`FileSelector`] and sort the candidates.
//! 2. **BuildCollection**: find or create the target collection.
//! 3. **UploadAll**: one file at a time, derive metadata and a stable document id
//!    and upload. Consecutive upload calls are spaced by at least
//!    `IngestConfig::request_delay_ms`, whatever the previous call returned.
//! 4. **MonitorIngestion**: poll each uploaded document until all are terminal or
//!    the poll timeout elapses.
//! 5. **ExtractGraph** (optional): trigger knowledge-graph extraction and count
//!    what it produced.
//! 6. **Summarize**: log and return [`RunStatistics`].
//!
//! # Error Handling
//! Only selection and collection setup can fail the run ([`IngestError`]). A file
//! that cannot be read or uploaded becomes an [`UploadOutcome::Failed`] and the
//! loop moves on. Monitoring timeouts report documents as pending; graph
//! extraction failures leave the counts at zero.
//!
//! # Cancellation
//! The [`CancellationToken`] is checked before every upload and while waiting
//! between calls. A cancelled run stops uploading, skips monitoring and graph
//! extraction, and returns statistics with `interrupted` set. Documents already
//! uploaded stay in the store.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::contract::{
    Collection, CommitInfo, DocumentStore, IngestionStatus, NewDocument, RepoInfo, StoreError,
};
use crate::error::IngestError;
use crate::identity::document_id;
use crate::metadata::{upload_file_name, MetadataBuilder};
use crate::select::{CandidateFile, FileSelector, SelectionReport};
use crate::transport::TransportError;

/// A repository checkout ready to be ingested.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub repo: RepoInfo,
    pub local_path: PathBuf,
    pub commit: CommitInfo,
    /// Defaults to `repo-<repo name>`.
    pub collection_name: Option<String>,
    pub extract_graph: bool,
}

impl IngestRequest {
    pub fn collection_name(&self) -> String {
        self.collection_name
            .clone()
            .unwrap_or_else(|| format!("repo-{}", self.repo.name))
    }

    pub fn collection_description(&self) -> String {
        format!("Code repository: {}", self.repo.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The file could not be read from disk.
    Read,
    /// The store refused the upload (non-retryable 4xx).
    Rejected,
    /// The store stayed unavailable through every retry.
    RetryExhausted,
    Other,
}

impl FailureKind {
    fn of(error: &StoreError) -> Self {
        match error {
            StoreError::Transport(TransportError::Client { .. }) => FailureKind::Rejected,
            StoreError::Transport(TransportError::RetryExhausted { .. }) => {
                FailureKind::RetryExhausted
            }
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub relative_path: String,
    pub reason: String,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        relative_path: String,
        document_id: Uuid,
    },
    Failed(FileFailure),
}

/// Final processing state of the uploaded documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub success: usize,
    pub failed: usize,
    /// Documents still non-terminal when monitoring stopped.
    pub pending: usize,
    pub timed_out: bool,
}

impl IngestionSummary {
    pub fn from_statuses(statuses: &BTreeMap<Uuid, IngestionStatus>, timed_out: bool) -> Self {
        let mut summary = IngestionSummary {
            timed_out,
            ..Default::default()
        };
        for status in statuses.values() {
            match status {
                IngestionStatus::Success => summary.success += 1,
                IngestionStatus::Failed => summary.failed += 1,
                _ => summary.pending += 1,
            }
        }
        summary
    }
}

/// Everything a run observed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    pub repo_name: String,
    pub repo_url: String,
    pub commit_hash: String,
    pub collection_name: String,
    pub collection_id: Option<String>,
    pub files_found: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub skipped: SelectionReport,
    pub by_language: BTreeMap<String, usize>,
    pub total_bytes: u64,
    pub document_ids: Vec<Uuid>,
    pub failures: Vec<FileFailure>,
    pub ingestion: IngestionSummary,
    pub kg_entities: usize,
    pub kg_relationships: usize,
    pub duration_secs: f64,
    pub interrupted: bool,
}

/// How a run ended, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Partial,
    Failure,
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Partial => 1,
            RunOutcome::Failure => 2,
            RunOutcome::Interrupted => 130,
        }
    }
}

impl RunStatistics {
    /// Uploaded over found; zero when nothing was found.
    pub fn success_rate(&self) -> f64 {
        if self.files_found == 0 {
            return 0.0;
        }
        self.files_uploaded as f64 / self.files_found as f64
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.interrupted {
            return RunOutcome::Interrupted;
        }
        let rate = self.success_rate();
        if rate >= 0.9 {
            RunOutcome::Success
        } else if rate >= 0.5 {
            RunOutcome::Partial
        } else {
            RunOutcome::Failure
        }
    }

    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded { document_id, .. } => {
                self.files_uploaded += 1;
                self.document_ids.push(document_id);
            }
            UploadOutcome::Failed(failure) => {
                self.files_failed += 1;
                self.failures.push(failure);
            }
        }
    }

    pub fn trace_summary(&self) {
        info!(
            repo = %self.repo_name,
            collection = %self.collection_name,
            collection_id = ?self.collection_id,
            found = self.files_found,
            uploaded = self.files_uploaded,
            failed = self.files_failed,
            ingested = self.ingestion.success,
            ingestion_failed = self.ingestion.failed,
            pending = self.ingestion.pending,
            kg_entities = self.kg_entities,
            kg_relationships = self.kg_relationships,
            duration_secs = self.duration_secs,
            interrupted = self.interrupted,
            "[INGEST] Summary"
        );
        for failure in &self.failures {
            warn!(
                path = %failure.relative_path,
                kind = ?failure.kind,
                reason = %failure.reason,
                "[INGEST] Upload failed"
            );
        }
    }
}

/// Enforces a minimum gap between the starts of consecutive calls.
#[derive(Debug)]
pub struct RequestSpacer {
    min_gap: Duration,
    last_call: Option<Instant>,
}

impl RequestSpacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_call: None,
        }
    }

    /// Waits until the next call may start and marks it as started. Returns
    /// false, without marking, if `cancel` fires while waiting.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> bool {
        if let Some(last) = self.last_call {
            let ready_at = last + self.min_gap;
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }
        if cancel.is_cancelled() {
            return false;
        }
        self.last_call = Some(Instant::now());
        true
    }
}

/// Reuses the collection called `name` if it exists, otherwise creates it.
pub async fn ensure_collection<S>(
    store: &S,
    name: &str,
    description: &str,
) -> Result<Collection, StoreError>
where
    S: DocumentStore + ?Sized,
{
    if let Some(existing) = store.find_collection(name).await? {
        info!(collection = %name, id = %existing.id, "[INGEST] Reusing existing collection");
        return Ok(existing);
    }
    let created = store.create_collection(name, description).await?;
    info!(collection = %name, id = %created.id, "[INGEST] Created collection");
    Ok(created)
}

/// Polls every document until all are terminal, `timeout` elapses or `cancel`
/// fires. Documents that were never observed terminal stay pending. Status
/// lookup errors are logged and retried on the next round.
///
/// Returns the last status seen per document and whether the timeout was hit.
pub async fn monitor_ingestion<S>(
    store: &S,
    document_ids: &[Uuid],
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> (BTreeMap<Uuid, IngestionStatus>, bool)
where
    S: DocumentStore + ?Sized,
{
    let mut statuses: BTreeMap<Uuid, IngestionStatus> = document_ids
        .iter()
        .map(|id| (*id, IngestionStatus::Pending))
        .collect();
    if statuses.is_empty() {
        return (statuses, false);
    }

    info!(documents = statuses.len(), timeout = ?timeout, "[INGEST][MONITOR] Waiting for ingestion");
    let deadline = Instant::now() + timeout;

    let timed_out = loop {
        let mut all_done = true;
        for (id, status) in statuses.iter_mut() {
            if status.is_terminal() {
                continue;
            }
            match store.document_status(*id).await {
                Ok(latest) => {
                    if !latest.is_terminal() {
                        all_done = false;
                    }
                    *status = latest;
                }
                Err(e) => {
                    warn!(document_id = %id, error = %e, "[INGEST][MONITOR] Status check failed");
                    all_done = false;
                }
            }
        }
        if all_done {
            break false;
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(timeout = ?timeout, "[INGEST][MONITOR] Timed out waiting for ingestion");
            break true;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("[INGEST][MONITOR] Cancelled while waiting for ingestion");
                break false;
            }
            _ = sleep(poll_interval.min(deadline - now)) => {}
        }
    };

    let summary = IngestionSummary::from_statuses(&statuses, timed_out);
    info!(
        success = summary.success,
        failed = summary.failed,
        pending = summary.pending,
        "[INGEST][MONITOR] Ingestion status"
    );
    (statuses, timed_out)
}

/// Runs the whole pipeline for one repository checkout.
pub async fn ingest_repository<S>(
    config: &IngestConfig,
    store: &S,
    request: &IngestRequest,
    cancel: &CancellationToken,
) -> Result<RunStatistics, IngestError>
where
    S: DocumentStore + ?Sized,
{
    let started = Instant::now();
    let collection_name = request.collection_name();
    let mut stats = RunStatistics {
        repo_name: request.repo.name.clone(),
        repo_url: request.repo.url.clone(),
        commit_hash: request.commit.hash.clone(),
        collection_name: collection_name.clone(),
        ..Default::default()
    };

    info!(
        repo = %request.repo.name,
        path = %request.local_path.display(),
        commit = %request.commit.short_hash,
        "[INGEST] Starting ingestion"
    );

    // Select
    let mut selection = FileSelector::new(config).select_files(&request.local_path)?;
    selection
        .files
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let files = std::mem::take(&mut selection.files);
    stats.files_found = files.len();
    stats.total_bytes = files.iter().map(|f| f.size).sum();
    stats.by_language = {
        let mut groups = BTreeMap::new();
        for file in &files {
            *groups.entry(file.language.clone()).or_insert(0) += 1;
        }
        groups
    };
    stats.skipped = selection;

    info!(
        found = stats.files_found,
        total_bytes = stats.total_bytes,
        skipped = stats.skipped.skipped_total(),
        "[INGEST] File selection complete"
    );
    for (language, count) in &stats.by_language {
        debug!(language = %language, files = count, "[INGEST] Language breakdown");
    }

    if files.is_empty() {
        warn!("[INGEST] No supported files found in repository");
        stats.duration_secs = started.elapsed().as_secs_f64();
        stats.trace_summary();
        return Ok(stats);
    }

    if cancel.is_cancelled() {
        warn!(found = stats.files_found, "[INGEST] Interrupted before collection setup");
        stats.interrupted = true;
        stats.duration_secs = started.elapsed().as_secs_f64();
        stats.trace_summary();
        return Ok(stats);
    }

    // BuildCollection
    let collection = ensure_collection(store, &collection_name, &request.collection_description())
        .await
        .map_err(|source| {
            error!(collection = %collection_name, error = %source, "[INGEST][ERROR] Collection setup failed");
            IngestError::CollectionSetup {
                name: collection_name.clone(),
                source,
            }
        })?;
    stats.collection_id = Some(collection.id.clone());

    // UploadAll
    let builder = MetadataBuilder::default();
    let mut spacer = RequestSpacer::new(config.request_delay());
    let total = files.len();
    for (index, file) in files.iter().enumerate() {
        if !spacer.acquire(cancel).await {
            warn!(
                uploaded = stats.files_uploaded,
                remaining = total - index,
                "[INGEST] Interrupted, stopping uploads"
            );
            stats.interrupted = true;
            break;
        }

        let outcome = upload_file(config, store, &builder, request, &collection, file).await;
        let progress = (index + 1) as f64 / total as f64 * 100.0;
        match &outcome {
            UploadOutcome::Uploaded { relative_path, document_id } => {
                info!(progress = %format!("{progress:.1}%"), path = %relative_path, document_id = %document_id, "[INGEST][UPLOAD] Uploaded");
            }
            UploadOutcome::Failed(failure) => {
                error!(progress = %format!("{progress:.1}%"), path = %failure.relative_path, reason = %failure.reason, "[INGEST][UPLOAD] Failed");
            }
        }
        stats.record(outcome);
    }

    info!(
        uploaded = stats.files_uploaded,
        failed = stats.files_failed,
        found = stats.files_found,
        "[INGEST] Upload phase complete"
    );

    if stats.interrupted {
        stats.ingestion.pending = stats.document_ids.len();
        stats.duration_secs = started.elapsed().as_secs_f64();
        stats.trace_summary();
        return Ok(stats);
    }

    // MonitorIngestion
    let (statuses, timed_out) = monitor_ingestion(
        store,
        &stats.document_ids,
        config.poll_interval(),
        config.poll_timeout(),
        cancel,
    )
    .await;
    stats.ingestion = IngestionSummary::from_statuses(&statuses, timed_out);
    if cancel.is_cancelled() {
        stats.interrupted = true;
    }

    // ExtractGraph
    if request.extract_graph && !stats.interrupted {
        match extract_graph(config, store, &collection.id, cancel).await {
            Ok(Some((entities, relationships))) => {
                stats.kg_entities = entities;
                stats.kg_relationships = relationships;
            }
            Ok(None) => stats.interrupted = true,
            Err(e) => {
                error!(collection_id = %collection.id, error = %e, "[INGEST][ERROR] Knowledge graph extraction failed");
            }
        }
    }

    // Summarize
    stats.duration_secs = started.elapsed().as_secs_f64();
    stats.trace_summary();
    Ok(stats)
}

async fn upload_file<S>(
    config: &IngestConfig,
    store: &S,
    builder: &MetadataBuilder,
    request: &IngestRequest,
    collection: &Collection,
    file: &CandidateFile,
) -> UploadOutcome
where
    S: DocumentStore + ?Sized,
{
    let content = match fs::read(&file.path) {
        Ok(content) => content,
        Err(e) => {
            return UploadOutcome::Failed(FileFailure {
                relative_path: file.relative_path.clone(),
                reason: e.to_string(),
                kind: FailureKind::Read,
            })
        }
    };

    let metadata = builder.build_metadata_from_content(file, &content, &request.repo, &request.commit);
    let document = NewDocument {
        document_id: document_id(&request.repo.url, &file.relative_path),
        upload_name: upload_file_name(file.file_name(), &config.text_upload_extensions),
        content,
        metadata,
        collection_id: Some(collection.id.clone()),
    };

    match store.upload_document(document).await {
        Ok(uploaded) => UploadOutcome::Uploaded {
            relative_path: file.relative_path.clone(),
            document_id: uploaded.document_id,
        },
        Err(e) => UploadOutcome::Failed(FileFailure {
            relative_path: file.relative_path.clone(),
            kind: FailureKind::of(&e),
            reason: e.to_string(),
        }),
    }
}

/// `Ok(None)` when cancelled during the extraction wait.
async fn extract_graph<S>(
    config: &IngestConfig,
    store: &S,
    collection_id: &str,
    cancel: &CancellationToken,
) -> Result<Option<(usize, usize)>, StoreError>
where
    S: DocumentStore + ?Sized,
{
    info!(collection_id, "[INGEST] Pulling knowledge graph");
    store.pull_graph(collection_id).await?;

    info!(wait = ?config.graph_wait(), "[INGEST] Waiting for graph extraction");
    tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        _ = sleep(config.graph_wait()) => {}
    }

    let entities = store
        .graph_entity_count(collection_id, config.graph_limit)
        .await?;
    let relationships = store
        .graph_relationship_count(collection_id, config.graph_limit)
        .await?;
    info!(entities, relationships, "[INGEST] Knowledge graph extracted");
    Ok(Some((entities, relationships)))
}
