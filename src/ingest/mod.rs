//! Ingestion pipelines that populate the mirror
//!
//! - [`bulk`]: full snapshot from the bulk archive of per-entity records
//! - [`incremental`]: catch-up from recent daily change listings
//! - [`backfill`]: historical quarters from the full-index listings

pub mod backfill;
pub mod bulk;
pub mod incremental;

pub use backfill::Backfiller;
pub use bulk::{extract_archive, list_submission_files, merge_submissions, BulkIngestor, BulkOptions, MergedBatch};
pub use incremental::IncrementalUpdater;

use crate::parsing::ParseError;
use crate::registry::RegistryError;
use crate::store::{InsertOutcome, MirrorStore, StoreError};
use crate::types::{Company, Filing};
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort an ingestion run
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worker task failed: {0}")]
    Task(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(e: tokio::task::JoinError) -> Self {
        IngestError::Task(e.to_string())
    }
}

/// Upsert entities then insert filings on a blocking thread.
///
/// Entities go first so that filings written in the same batch always find
/// their owner.
pub(crate) async fn write_batch(
    store: &Arc<dyn MirrorStore>,
    companies: Vec<Company>,
    filings: Vec<Filing>,
) -> Result<(usize, InsertOutcome), IngestError> {
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
        let written = if companies.is_empty() {
            0
        } else {
            store.upsert_companies(&companies)?
        };
        let outcome = if filings.is_empty() {
            InsertOutcome::default()
        } else {
            store.insert_filings(&filings)?
        };
        Ok((written, outcome))
    })
    .await??;
    Ok(result)
}
