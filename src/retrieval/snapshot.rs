//! JSON snapshot of a download run, grouped by entity

use super::fetcher::DocumentOutcome;
use super::resolver::DocumentSource;
use super::RetrievalError;
use crate::types::Cik;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One attempted filing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub accession_number: String,
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub stored_filename: String,
    pub resolved_filename: String,
    pub source: DocumentSource,
    pub url: String,
    pub excluded: bool,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCompany {
    pub name: String,
    pub filings: Vec<SnapshotEntry>,
}

/// Snapshot contents keyed by CIK
pub type Snapshot = BTreeMap<Cik, SnapshotCompany>;

/// `<form-slug>_filings_metadata_<start>_<end>.json`
pub fn snapshot_file_name(forms: &[String], start_year: i32, end_year: i32) -> String {
    let slug = forms
        .iter()
        .map(|f| {
            f.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug = if slug.is_empty() { "all".to_string() } else { slug };
    format!("{}_filings_metadata_{}_{}.json", slug, start_year, end_year)
}

/// Group outcomes by entity, keeping their order within each entity
pub fn build_snapshot(outcomes: &[DocumentOutcome]) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for outcome in outcomes {
        let document = &outcome.document;
        let filing = &document.record.filing;
        snapshot
            .entry(filing.cik.clone())
            .or_insert_with(|| SnapshotCompany {
                name: document.record.company_name.clone(),
                filings: Vec::new(),
            })
            .filings
            .push(SnapshotEntry {
                accession_number: filing.accession_number.to_string(),
                form_type: filing.form_type.clone(),
                filing_date: filing.filing_date,
                stored_filename: filing.filename.clone(),
                resolved_filename: document.filename.clone(),
                source: document.source,
                url: document.url.clone(),
                excluded: document.excluded,
                status: outcome.status.label().to_string(),
                error: outcome.status.error().map(str::to_string),
            });
    }
    snapshot
}

/// Write the snapshot into `dir`, replacing any previous one atomically
pub fn write_snapshot(dir: &Path, file_name: &str, snapshot: &Snapshot) -> Result<PathBuf, RetrievalError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let temp = dir.join(format!("{}.tmp", file_name));
    std::fs::write(&temp, serde_json::to_vec_pretty(snapshot)?)?;
    std::fs::rename(&temp, &path)?;
    Ok(path)
}
