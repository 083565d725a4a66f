//! Per-entity submission records
//!
//! Two file shapes live in the bulk archive:
//! - `CIK##########.json`: entity profile plus the recent filings as columnar
//!   arrays under `filings.recent`
//! - `CIK##########-submissions-NNN.json`: continuation pages holding only
//!   the columnar arrays at top level
//!
//! The metadata endpoint returns the first shape.

use super::ParseError;
use crate::types::{AccessionNumber, BusinessAddress, Cik, Company, Filing};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

static RE_SUBMISSION_FILE: OnceLock<Regex> = OnceLock::new();

/// Shape of a submission file, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// Profile and recent filings
    Profile,
    /// Continuation page of older filings
    Page,
}

/// Result of parsing one submission file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSubmission {
    pub cik: Cik,
    /// Present only for profile files
    pub company: Option<Company>,
    pub filings: Vec<Filing>,
    /// Filing records skipped for a missing value or bad date
    pub skipped_records: usize,
}

/// Entity key and shape encoded in a submission file name
pub fn submission_key(file_name: &str) -> Option<(Cik, SubmissionKind)> {
    let re = RE_SUBMISSION_FILE
        .get_or_init(|| Regex::new(r"^CIK(\d{10})(-submissions-\d+)?\.json$").unwrap());
    let caps = re.captures(file_name)?;
    let cik = Cik::parse(&caps[1])?;
    let kind = if caps.get(2).is_some() {
        SubmissionKind::Page
    } else {
        SubmissionKind::Profile
    };
    Some((cik, kind))
}

/// Parse a submission file from disk
pub fn parse_submission_file(path: &Path) -> Result<ParsedSubmission, ParseError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_submission_bytes(&file_name, &bytes)
}

/// Parse the contents of a submission file given its name
pub fn parse_submission_bytes(file_name: &str, bytes: &[u8]) -> Result<ParsedSubmission, ParseError> {
    let (cik, kind) =
        submission_key(file_name).ok_or_else(|| ParseError::InvalidFileName(file_name.to_string()))?;

    let value: Value = serde_json::from_slice(bytes).map_err(|source| ParseError::Json {
        name: file_name.to_string(),
        source,
    })?;

    let (company, columns) = match kind {
        SubmissionKind::Profile => (
            Some(parse_company_profile(&cik, &value)),
            value.get("filings").and_then(|f| f.get("recent")),
        ),
        SubmissionKind::Page => (None, Some(&value)),
    };

    let (filings, skipped_records) = match columns {
        Some(columns) => parse_filing_columns(&cik, columns),
        None => (Vec::new(), 0),
    };

    if skipped_records > 0 {
        debug!("{}: skipped {} incomplete filing records", file_name, skipped_records);
    }

    Ok(ParsedSubmission {
        cik,
        company,
        filings,
        skipped_records,
    })
}

/// Extract the entity profile from a submission document.
///
/// Missing optional fields never fail the parse; they stay `None`.
pub fn parse_company_profile(cik: &Cik, value: &Value) -> Company {
    let name = text_field(value, "entityName")
        .filter(|n| !n.trim().is_empty())
        .or_else(|| text_field(value, "name").filter(|n| !n.trim().is_empty()))
        .unwrap_or_else(|| format!("Company CIK {}", cik));

    let business_address = value
        .get("addresses")
        .and_then(|a| a.get("business"))
        .filter(|b| b.is_object())
        .map(|b| BusinessAddress {
            street1: text_field(b, "street1"),
            street2: text_field(b, "street2"),
            city: text_field(b, "city"),
            state_or_country: text_field(b, "stateOrCountry"),
            state_or_country_description: text_field(b, "stateOrCountryDescription"),
            zip_code: text_field(b, "zipCode"),
        });

    Company {
        cik: cik.clone(),
        name,
        sic: text_field(value, "sic"),
        entity_type: text_field(value, "entityType"),
        sic_description: text_field(value, "sicDescription"),
        insider_trade_owner: flag_field(value, "insiderTransactionForOwnerExists"),
        insider_trade_issuer: flag_field(value, "insiderTransactionForIssuerExists"),
        business_address,
        phone: text_field(value, "phone"),
    }
}

/// Zip the columnar arrays into filings, up to the shortest column
fn parse_filing_columns(cik: &Cik, columns: &Value) -> (Vec<Filing>, usize) {
    let column = |key: &str| -> &[Value] {
        columns
            .get(key)
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    };

    let accessions = column("accessionNumber");
    let dates = column("filingDate");
    let forms = column("form");
    let documents = column("primaryDocument");

    let len = accessions.len().min(dates.len()).min(forms.len()).min(documents.len());
    let mut filings = Vec::with_capacity(len);
    let mut skipped = 0;

    for i in 0..len {
        let record = (|| {
            let accession = AccessionNumber::parse(non_empty(&accessions[i])?)?;
            let filing_date = NaiveDate::parse_from_str(non_empty(&dates[i])?, "%Y-%m-%d").ok()?;
            let form_type = non_empty(&forms[i])?.trim().to_uppercase();
            let filename = non_empty(&documents[i])?.trim().to_string();
            Some(Filing {
                cik: cik.clone(),
                form_type,
                filing_date,
                accession_number: accession,
                filename,
            })
        })();

        match record {
            Some(filing) => filings.push(filing),
            None => skipped += 1,
        }
    }

    (filings, skipped)
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}

/// String or number field; `None` when absent or null
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 0/1 (or boolean) flag; anything else is treated as not provided
fn flag_field(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}
