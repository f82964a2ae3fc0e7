use thiserror::Error;

use crate::contract::{StoreError, VcsError};
use crate::select::SelectionError;

/// Failures that end an ingestion run. Anything scoped to a single file is
/// recorded in the run statistics instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("authentication with the document store failed: {0}")]
    Authentication(#[source] StoreError),
    #[error("could not set up collection `{name}`: {source}")]
    CollectionSetup {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
}
