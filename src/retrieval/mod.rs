//! Document retrieval for mirrored filings
//!
//! Selected filings are resolved to their primary document through the
//! filing index page, then downloaded on a bounded pool. Every run leaves a
//! JSON snapshot describing what was attempted.

pub mod fetcher;
pub mod resolver;
pub mod snapshot;

pub use fetcher::{
    document_file_name, sanitize_filename, DocumentFetcher, DocumentOutcome, DownloadReport, DownloadStatus,
};
pub use resolver::{DocumentSource, FilingResolver, ResolvedDocument};
pub use snapshot::{build_snapshot, snapshot_file_name, write_snapshot, Snapshot, SnapshotCompany, SnapshotEntry};

use crate::store::StoreError;
use thiserror::Error;

/// Errors that abort a retrieval run
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Worker task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for RetrievalError {
    fn from(e: tokio::task::JoinError) -> Self {
        RetrievalError::Task(e.to_string())
    }
}
