//! Local mirror of entities and filings
//!
//! Writes are idempotent: entities are upserted as whole records keyed on
//! their CIK, filings are inserted once per accession number and later
//! inserts of the same accession are ignored.

mod query;
mod sled_store;

pub use query::FilingQuery;
pub use sled_store::SledMirror;

use crate::types::{AccessionNumber, Cik, Company, Filing, FilingRecord, StoredFiling};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Failed to encode or decode record: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Outcome of an ignore-on-conflict batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub already_present: usize,
}

impl InsertOutcome {
    pub fn merge(&mut self, other: InsertOutcome) {
        self.inserted += other.inserted;
        self.already_present += other.already_present;
    }
}

/// Row counts of the mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorCounts {
    pub companies: usize,
    pub filings: usize,
}

/// Persistence seam used by every pipeline
pub trait MirrorStore: Send + Sync {
    /// Insert or fully overwrite entities, returning how many were written
    fn upsert_companies(&self, companies: &[Company]) -> Result<usize, StoreError>;

    /// Insert filings, silently skipping accession numbers already present
    fn insert_filings(&self, filings: &[Filing]) -> Result<InsertOutcome, StoreError>;

    fn company(&self, cik: &Cik) -> Result<Option<Company>, StoreError>;

    fn filing(&self, accession: &AccessionNumber) -> Result<Option<StoredFiling>, StoreError>;

    /// Accession numbers of filings dated within `[start, end]`
    fn accessions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<HashSet<AccessionNumber>, StoreError>;

    /// Filings matching `query`, joined to their entity, newest first
    fn find_filings(&self, query: &FilingQuery) -> Result<Vec<FilingRecord>, StoreError>;

    fn counts(&self) -> Result<MirrorCounts, StoreError>;

    /// Persist buffered writes
    fn flush(&self) -> Result<(), StoreError>;
}
