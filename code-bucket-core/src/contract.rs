#![allow(unused)]

//! # contract: the seams between the pipeline and the outside world
//!
//! The ingestion pipeline talks to two collaborators it does not own:
//!
//! - a **document store** reached over HTTP ([`DocumentStore`]), which keeps one
//!   document per source file inside a named collection, processes it
//!   asynchronously and can optionally build a knowledge graph per collection;
//! - a **repository source** ([`RepositorySource`]), which materialises a
//!   repository on local disk and reports the commit it is at.
//!
//! Both are traits so the orchestrator can run against the real clients, or
//! against `mockall` mocks in tests. `DocumentStore` mocks are exported under the
//! default `test-export-mocks` feature so downstream crates can use them too.
//!
//! All types here are plain data; identity and metadata are computed elsewhere.

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::metadata::FileMetadata;
use crate::transport::TransportError;

/// Repository identity carried into every document's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub url: String,
}

/// The commit a synced repository is checked out at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub date: String,
}

/// A repository available on local disk.
#[derive(Debug, Clone)]
pub struct SyncedRepository {
    pub info: RepoInfo,
    pub local_path: PathBuf,
    /// True when the working copy was freshly cloned or changed by a pull.
    pub updated: bool,
}

/// A named group of documents in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
}

/// Everything needed to upload one file.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Client-supplied identifier; re-uploading under the same id replaces the document.
    pub document_id: Uuid,
    /// Name the file is sent under; may differ from the real name in its extension.
    pub upload_name: String,
    pub content: Vec<u8>,
    pub metadata: FileMetadata,
    pub collection_id: Option<String>,
}

/// The store's acknowledgement of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    pub document_id: Uuid,
}

/// Per-document processing state reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionStatus {
    Pending,
    Success,
    Failed,
    /// Any intermediate state the store reports (parsing, embedding, ...).
    Other(String),
}

impl IngestionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStatus::Success | IngestionStatus::Failed)
    }

    pub fn from_store(raw: &str) -> Self {
        match raw {
            "pending" => IngestionStatus::Pending,
            "success" => IngestionStatus::Success,
            "failed" => IngestionStatus::Failed,
            other => IngestionStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionStatus::Pending => f.write_str("pending"),
            IngestionStatus::Success => f.write_str("success"),
            IngestionStatus::Failed => f.write_str("failed"),
            IngestionStatus::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected response from document store: {0}")]
    Decode(String),
}

/// Operations the pipeline needs from the remote document store.
///
/// Implementors are expected to retry transient failures internally (see
/// [`crate::transport::ResilientTransport`]); an `Err` here is final for that call.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Looks a collection up by exact name.
    async fn find_collection(&self, name: &str) -> Result<Option<Collection>, StoreError>;

    /// Creates a new collection. Callers wanting get-or-create semantics should
    /// call [`find_collection`](Self::find_collection) first.
    async fn create_collection(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Collection, StoreError>;

    /// Uploads one file with its metadata.
    async fn upload_document(&self, document: NewDocument) -> Result<UploadedDocument, StoreError>;

    async fn document_status(&self, document_id: Uuid) -> Result<IngestionStatus, StoreError>;

    /// Starts knowledge-graph extraction for a collection; runs asynchronously.
    async fn pull_graph(&self, collection_id: &str) -> Result<(), StoreError>;

    async fn graph_entity_count(&self, collection_id: &str, limit: usize)
        -> Result<usize, StoreError>;

    async fn graph_relationship_count(
        &self,
        collection_id: &str,
        limit: usize,
    ) -> Result<usize, StoreError>;
}

/// Error type for [`RepositorySource`].
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to launch git: {0}")]
    Launch(#[from] std::io::Error),
    #[error("`git {command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),
    #[error("unexpected git output: {0}")]
    Output(String),
}

/// Brings a repository onto local disk and describes its checked-out commit.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn sync(
        &self,
        repo_url: &str,
        branch: Option<String>,
        update: bool,
    ) -> Result<SyncedRepository, VcsError>;

    fn commit_info(&self, local_path: &Path) -> Result<CommitInfo, VcsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_and_terminality() {
        assert_eq!(IngestionStatus::from_store("success"), IngestionStatus::Success);
        assert_eq!(IngestionStatus::from_store("failed"), IngestionStatus::Failed);
        assert_eq!(IngestionStatus::from_store("pending"), IngestionStatus::Pending);
        let embedding = IngestionStatus::from_store("embedding");
        assert_eq!(embedding, IngestionStatus::Other("embedding".into()));

        assert!(IngestionStatus::Success.is_terminal());
        assert!(IngestionStatus::Failed.is_terminal());
        assert!(!IngestionStatus::Pending.is_terminal());
        assert!(!embedding.is_terminal());
        assert_eq!(embedding.to_string(), "embedding");
    }
}
