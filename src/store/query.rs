//! Selection criteria for the download stage

use crate::config::{FilterConfig, PipelineConfig};
use crate::types::{Company, Filing};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Which mirrored filings the download stage should consider.
///
/// Filings are joined to their entity; a filing whose entity is not mirrored
/// is never selected. Entities whose industry code is in `excluded_sic_codes`
/// are dropped, entities without a code are kept.
#[derive(Debug, Clone)]
pub struct FilingQuery {
    /// Upper-cased form types to select
    pub forms: HashSet<String>,
    /// First filing date, inclusive
    pub start_date: NaiveDate,
    /// Last filing date, inclusive
    pub end_date: NaiveDate,
    pub excluded_sic_codes: HashSet<String>,
    /// Maximum number of rows, newest first
    pub limit: Option<usize>,
}

impl FilingQuery {
    /// Query covering January 1 of `start_year` through December 31 of `end_year`
    pub fn for_years(start_year: i32, end_year: i32, forms: &[String], filter: &FilterConfig) -> Option<Self> {
        Some(Self {
            forms: forms.iter().map(|f| f.trim().to_uppercase()).collect(),
            start_date: NaiveDate::from_ymd_opt(start_year, 1, 1)?,
            end_date: NaiveDate::from_ymd_opt(end_year, 12, 31)?,
            excluded_sic_codes: filter.excluded_sic_codes.iter().cloned().collect(),
            limit: None,
        })
    }

    /// Query over the configured target forms
    pub fn from_config(start_year: i32, end_year: i32, pipeline: &PipelineConfig, filter: &FilterConfig) -> Option<Self> {
        Self::for_years(start_year, end_year, &pipeline.target_forms, filter)
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Filing-level criteria: form type and date window
    pub fn accepts_filing(&self, filing: &Filing) -> bool {
        self.forms.contains(&filing.form_type)
            && filing.filing_date >= self.start_date
            && filing.filing_date <= self.end_date
    }

    /// Entity-level criteria: category exclusion by industry code
    pub fn accepts_company(&self, company: &Company) -> bool {
        match &company.sic {
            Some(code) => !self.excluded_sic_codes.contains(code.trim()),
            None => true,
        }
    }
}
