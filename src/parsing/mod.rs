//! Parsers for the three registry data shapes
//!
//! - [`submissions`]: per-entity JSON records from the bulk archive and the
//!   metadata endpoint
//! - [`daily_index`]: pipe-delimited daily and quarterly master listings
//! - [`filing_index`]: per-filing HTML index pages

pub mod daily_index;
pub mod filing_index;
pub mod submissions;

pub use daily_index::{parse_master_index, ParsedListing};
pub use filing_index::{parse_filing_index, IndexDocument};
pub use submissions::{
    parse_company_profile, parse_submission_bytes, parse_submission_file, submission_key, ParsedSubmission,
    SubmissionKind,
};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that reject a whole input unit
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("File name does not carry an entity key: {0}")]
    InvalidFileName(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in {name}: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Listing has no CIK|Company Name|Form Type|Date Filed|Filename header")]
    MissingHeader,
    #[error("Index page has no document table")]
    MissingDocumentTable,
}
