//! Remote registry access
//!
//! All outbound traffic goes through [`RegistrySource`]. The HTTP
//! implementation attaches the caller identification and waits on the shared
//! [`RateLimiter`] before every request, so nothing reaches the registry
//! outside the rate budget.

mod client;
mod rate_limit;
mod urls;

pub use client::HttpRegistry;
pub use rate_limit::{overload_backoff, RateLimiter};
pub use urls::{quarter_of, RegistryUrls};

use crate::types::{AccessionNumber, Cik};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use thiserror::Error;

/// Errors talking to the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("Gave up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
    #[error("Invalid response body from {url}: {reason}")]
    InvalidBody { url: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether the resource simply does not exist (or is not published).
    ///
    /// Daily listings answer 403 or 404 on weekends and holidays.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NotFound(_))
            || matches!(self, Self::Status { status, .. } if *status == 403)
    }
}

/// Source of registry data consumed by the pipelines
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Stream the bulk archive of per-entity records to `dest`, returning bytes written
    async fn download_bulk_archive(&self, dest: &Path) -> Result<u64, RegistryError>;

    /// Raw bytes of the daily change listing for `date`
    async fn fetch_daily_index(&self, date: NaiveDate) -> Result<Vec<u8>, RegistryError>;

    /// Raw bytes of the full listing for one calendar quarter
    async fn fetch_quarterly_index(&self, year: i32, quarter: u32) -> Result<Vec<u8>, RegistryError>;

    /// Entity profile from the metadata endpoint, `None` when the registry has no record
    async fn fetch_company_profile(&self, cik: &Cik) -> Result<Option<serde_json::Value>, RegistryError>;

    /// HTML of the filing index page
    async fn fetch_filing_index(&self, cik: &Cik, accession: &AccessionNumber) -> Result<String, RegistryError>;

    /// Download one filing document to `dest`, returning bytes written
    async fn download_document(&self, url: &str, dest: &Path) -> Result<u64, RegistryError>;
}

/// Decode listing bytes as UTF-8, falling back to Latin-1
pub fn decode_listing(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
