//! Core types for the filing mirror

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

static RE_ACCESSION_DASHED: OnceLock<Regex> = OnceLock::new();
static RE_ACCESSION_PLAIN: OnceLock<Regex> = OnceLock::new();
static RE_ACCESSION_LONG: OnceLock<Regex> = OnceLock::new();

// ============================================================================
// Identifiers
// ============================================================================

/// Registry entity key, stored as a zero-padded 10 digit string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cik(String);

impl Cik {
    /// Width of the canonical form
    pub const WIDTH: usize = 10;

    /// Parse a CIK from its padded or unpadded numeric form
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > Self::WIDTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Cik(format!("{:0>width$}", raw, width = Self::WIDTH)))
    }

    /// Build a CIK from its numeric value
    pub fn from_number(value: u64) -> Option<Self> {
        Self::parse(&value.to_string())
    }

    /// Canonical zero-padded form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form used in archive paths, without leading zeros
    pub fn unpadded(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl fmt::Display for Cik {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique filing identifier in canonical `##########-##-######` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessionNumber(String);

impl AccessionNumber {
    /// Parse an accession number given in dashed or 18-digit form
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let digits: String = raw.chars().filter(|c| *c != '-').collect();
        if digits.len() != 18 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if raw.contains('-') && !dashed_regex().is_match(raw) {
            return None;
        }
        Some(Self::from_digits(&digits))
    }

    /// Find an accession number embedded in arbitrary text such as an archive path.
    ///
    /// Tries the dashed form first, then a bare 18 digit run, then the first 18
    /// digits of a 20 digit run.
    pub fn find_in(text: &str) -> Option<Self> {
        if let Some(m) = dashed_regex().find(text) {
            return Some(AccessionNumber(m.as_str().to_string()));
        }

        let plain = RE_ACCESSION_PLAIN.get_or_init(|| Regex::new(r"(?:^|\D)(\d{18})(?:\D|$)").unwrap());
        if let Some(caps) = plain.captures(text) {
            return Some(Self::from_digits(&caps[1]));
        }

        let long = RE_ACCESSION_LONG.get_or_init(|| Regex::new(r"(?:^|\D)(\d{20})(?:\D|$)").unwrap());
        long.captures(text).map(|caps| Self::from_digits(&caps[1][..18]))
    }

    fn from_digits(digits: &str) -> Self {
        AccessionNumber(format!("{}-{}-{}", &digits[..10], &digits[10..12], &digits[12..18]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accession number with dashes removed, as used in archive directories
    pub fn without_dashes(&self) -> String {
        self.0.replace('-', "")
    }
}

impl fmt::Display for AccessionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn dashed_regex() -> &'static Regex {
    RE_ACCESSION_DASHED.get_or_init(|| Regex::new(r"\d{10}-\d{2}-\d{6}").unwrap())
}

// ============================================================================
// Entity
// ============================================================================

/// Business address of a registered entity.
///
/// `None` means the source did not provide the field, `Some("")` means it
/// reported an explicit blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAddress {
    pub street1: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub state_or_country: Option<String>,
    pub state_or_country_description: Option<String>,
    pub zip_code: Option<String>,
}

impl BusinessAddress {
    /// True when no field was provided at all
    pub fn is_empty(&self) -> bool {
        self.street1.is_none()
            && self.street2.is_none()
            && self.city.is_none()
            && self.state_or_country.is_none()
            && self.state_or_country_description.is_none()
            && self.zip_code.is_none()
    }
}

/// A registered filer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub cik: Cik,
    pub name: String,
    /// Four digit industry classification code
    pub sic: Option<String>,
    pub entity_type: Option<String>,
    pub sic_description: Option<String>,
    pub insider_trade_owner: Option<bool>,
    pub insider_trade_issuer: Option<bool>,
    pub business_address: Option<BusinessAddress>,
    pub phone: Option<String>,
}

impl Company {
    /// Minimal record with only the key and a display name
    pub fn new(cik: Cik, name: impl Into<String>) -> Self {
        Self {
            cik,
            name: name.into(),
            sic: None,
            entity_type: None,
            sic_description: None,
            insider_trade_owner: None,
            insider_trade_issuer: None,
            business_address: None,
            phone: None,
        }
    }

    /// Whether the stored profile lacks fields that a metadata lookup would fill
    pub fn needs_refresh(&self) -> bool {
        self.sic.is_none() || self.business_address.is_none()
    }
}

// ============================================================================
// Filings
// ============================================================================

/// One filing as published by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filing {
    pub cik: Cik,
    /// Upper-cased form type, e.g. `10-K`
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub accession_number: AccessionNumber,
    /// Primary document filename as recorded by the source
    pub filename: String,
}

/// A filing as persisted in the mirror, with its surrogate id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFiling {
    pub id: u64,
    pub filing: Filing,
}

/// A filing joined with its owning entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingRecord {
    pub id: u64,
    pub filing: Filing,
    pub company_name: String,
    pub sic: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cik_padding() {
        let cik = Cik::parse("320193").unwrap();
        assert_eq!(cik.as_str(), "0000320193");
        assert_eq!(cik.unpadded(), "320193");
        assert_eq!(Cik::parse("0000320193"), Some(cik));
    }

    #[test]
    fn test_cik_rejects_garbage() {
        assert!(Cik::parse("").is_none());
        assert!(Cik::parse("12a4").is_none());
        assert!(Cik::parse("12345678901").is_none());
    }

    #[test]
    fn test_cik_zero_unpadded() {
        assert_eq!(Cik::parse("0").unwrap().unpadded(), "0");
    }

    #[test]
    fn test_accession_parse_forms() {
        let dashed = AccessionNumber::parse("0000320193-23-000106").unwrap();
        let plain = AccessionNumber::parse("000032019323000106").unwrap();
        assert_eq!(dashed, plain);
        assert_eq!(dashed.without_dashes(), "000032019323000106");
        assert!(AccessionNumber::parse("0000320193-23-00010").is_none());
        assert!(AccessionNumber::parse("00003201-9323-000106").is_none());
    }

    #[test]
    fn test_accession_find_in_path() {
        let acc = AccessionNumber::find_in("edgar/data/320193/0000320193-23-000106.txt").unwrap();
        assert_eq!(acc.as_str(), "0000320193-23-000106");

        let acc = AccessionNumber::find_in("edgar/data/320193/000032019323000106.txt").unwrap();
        assert_eq!(acc.as_str(), "0000320193-23-000106");

        let acc = AccessionNumber::find_in("edgar/data/320193/00003201932300010677.txt").unwrap();
        assert_eq!(acc.as_str(), "0000320193-23-000106");

        assert!(AccessionNumber::find_in("edgar/data/320193/readme.txt").is_none());
    }

    #[test]
    fn test_company_needs_refresh() {
        let mut company = Company::new(Cik::parse("1").unwrap(), "Acme");
        assert!(company.needs_refresh());

        company.sic = Some("3711".to_string());
        assert!(company.needs_refresh());

        company.business_address = Some(BusinessAddress::default());
        assert!(!company.needs_refresh());

        // An explicit blank code counts as provided
        company.sic = Some(String::new());
        assert!(!company.needs_refresh());
    }
}
