//! Master index listings (daily change feeds and quarterly full indexes)
//!
//! ```text
//! Description:           Daily Index of EDGAR Dissemination Feed by Company Name
//! ...
//! CIK|Company Name|Form Type|Date Filed|Filename
//! --------------------------------------------------------------------------------
//! 320193|Apple Inc.|10-K|2023-11-03|edgar/data/320193/0000320193-23-000106.txt
//! ```

use super::ParseError;
use crate::types::{AccessionNumber, Cik, Filing};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::warn;

/// Maximum per-line warnings logged for one listing
const MAX_LINE_WARNINGS: usize = 5;

/// Filings extracted from one listing
#[derive(Debug, Clone, Default)]
pub struct ParsedListing {
    pub filings: Vec<Filing>,
    /// Malformed data lines that were skipped
    pub skipped_lines: usize,
    /// Valid lines dropped by the form filter
    pub filtered_lines: usize,
}

/// Parse a master listing, optionally keeping only `forms` (upper-cased form types).
///
/// A listing without the column header is rejected as a whole; malformed data
/// lines are skipped and counted.
pub fn parse_master_index(text: &str, forms: Option<&HashSet<String>>) -> Result<ParsedListing, ParseError> {
    let mut lines = text.lines();

    // Everything up to and including the header is preamble
    if !lines.by_ref().any(is_header) {
        return Err(ParseError::MissingHeader);
    }

    let mut listing = ParsedListing::default();
    let mut warnings = 0;

    for line in lines {
        let line = line.trim_end();
        if line.trim().is_empty() || is_separator(line) {
            continue;
        }

        match parse_line(line) {
            Ok(filing) => {
                if forms.is_some_and(|forms| !forms.contains(&filing.form_type)) {
                    listing.filtered_lines += 1;
                    continue;
                }
                listing.filings.push(filing);
            }
            Err(reason) => {
                listing.skipped_lines += 1;
                if warnings < MAX_LINE_WARNINGS {
                    warn!("Skipping listing line ({}): {}", reason, line);
                    warnings += 1;
                }
            }
        }
    }

    Ok(listing)
}

fn is_header(line: &str) -> bool {
    let normalized = line.trim().to_ascii_lowercase();
    normalized.starts_with("cik|company name|form type|date filed|")
        && (normalized.ends_with("|filename") || normalized.ends_with("|file name"))
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

fn parse_line(line: &str) -> Result<Filing, &'static str> {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    if parts.len() != 5 {
        return Err("wrong column count");
    }

    let cik = Cik::parse(parts[0]).ok_or("non-numeric CIK")?;
    let form_type = parts[2].to_uppercase();
    if form_type.is_empty() {
        return Err("empty form type");
    }
    let filing_date = parse_date(parts[3]).ok_or("unparseable date")?;
    let path = parts[4];
    let accession_number = AccessionNumber::find_in(path).ok_or("no accession number")?;
    let filename = path.rsplit('/').next().unwrap_or(path).to_string();

    Ok(Filing {
        cik,
        form_type,
        filing_date,
        accession_number,
        filename,
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}
