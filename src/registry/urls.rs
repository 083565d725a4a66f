//! URL layout of the remote registry

use crate::config::RegistryConfig;
use crate::types::{AccessionNumber, Cik};
use chrono::{Datelike, NaiveDate};

/// Builds every remote location the pipeline reads from
#[derive(Debug, Clone)]
pub struct RegistryUrls {
    archives: String,
    data_base: String,
    bulk_archive: String,
}

impl RegistryUrls {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            archives: config.archives_url(),
            data_base: config.data_base_url.trim_end_matches('/').to_string(),
            bulk_archive: config.bulk_archive_url.clone(),
        }
    }

    /// Bulk archive of per-entity records
    pub fn bulk_archive(&self) -> &str {
        &self.bulk_archive
    }

    /// Daily change listing for one calendar date
    pub fn daily_index(&self, date: NaiveDate) -> String {
        format!(
            "{}/daily-index/{}/QTR{}/master.{}.idx",
            self.archives,
            date.year(),
            quarter_of(date),
            date.format("%Y%m%d")
        )
    }

    /// Full listing for one calendar quarter
    pub fn quarterly_index(&self, year: i32, quarter: u32) -> String {
        format!("{}/full-index/{}/QTR{}/master.idx", self.archives, year, quarter)
    }

    /// Per-entity metadata endpoint
    pub fn company_profile(&self, cik: &Cik) -> String {
        format!("{}/submissions/CIK{}.json", self.data_base, cik.as_str())
    }

    /// Directory holding all documents of one filing
    pub fn filing_dir(&self, cik: &Cik, accession: &AccessionNumber) -> String {
        format!(
            "{}/data/{}/{}",
            self.archives,
            cik.unpadded(),
            accession.without_dashes()
        )
    }

    /// HTML page listing the documents and exhibits of one filing
    pub fn filing_index(&self, cik: &Cik, accession: &AccessionNumber) -> String {
        format!("{}/{}-index.html", self.filing_dir(cik, accession), accession)
    }

    /// One document inside a filing
    pub fn document(&self, cik: &Cik, accession: &AccessionNumber, filename: &str) -> String {
        format!("{}/{}", self.filing_dir(cik, accession), filename)
    }
}

/// Calendar quarter (1-4) of a date
pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}
