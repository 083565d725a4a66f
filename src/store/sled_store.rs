//! Mirror store on the sled embedded database
//!
//! Trees:
//! - `companies`: CIK -> bincode [`Company`]
//! - `filings`: accession number -> bincode [`StoredFiling`]
//! - `filings_by_date`: `YYYY-MM-DD|accession` -> accession (date-ordered index)

use super::{FilingQuery, InsertOutcome, MirrorCounts, MirrorStore, StoreError};
use crate::types::{AccessionNumber, Cik, Company, Filing, FilingRecord, StoredFiling};
use chrono::NaiveDate;
use sled::transaction::{TransactionError, TransactionResult};
use sled::Transactional;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// File name of the database inside the data directory
pub const MIRROR_DB_NAME: &str = "mirror.sled";

/// sled-backed mirror
pub struct SledMirror {
    db: sled::Db,
    companies: sled::Tree,
    filings: sled::Tree,
    by_date: sled::Tree,
}

impl SledMirror {
    /// Open or create the mirror under `data_dir`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = data_dir.as_ref().join(MIRROR_DB_NAME);
        let db = sled::open(&db_path)?;
        debug!("Opened mirror database at {:?}", db_path);
        Self::from_db(db)
    }

    /// In-memory mirror that is discarded on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let companies = db.open_tree("companies")?;
        let filings = db.open_tree("filings")?;
        let by_date = db.open_tree("filings_by_date")?;
        Ok(Self {
            db,
            companies,
            filings,
            by_date,
        })
    }

    /// Insert one filing unless its accession number is already present
    fn insert_filing(&self, filing: &Filing) -> Result<bool, StoreError> {
        let key = filing.accession_number.as_str().as_bytes();
        if self.filings.contains_key(key)? {
            return Ok(false);
        }

        let stored = StoredFiling {
            id: self.db.generate_id()?,
            filing: filing.clone(),
        };
        let value = bincode::serialize(&stored)?;
        let date_key = date_key(filing.filing_date, &filing.accession_number);

        let result: TransactionResult<bool, ()> =
            (&self.filings, &self.by_date).transaction(|(filings, by_date)| {
                if filings.get(key)?.is_some() {
                    return Ok(false);
                }
                filings.insert(key, value.as_slice())?;
                by_date.insert(date_key.as_bytes(), key)?;
                Ok(true)
            });

        result.map_err(|e| match e {
            TransactionError::Storage(e) => StoreError::Sled(e),
            TransactionError::Abort(()) => StoreError::Transaction(format!(
                "insert of {} aborted",
                filing.accession_number
            )),
        })
    }

    fn decode_filing(&self, accession: &[u8]) -> Result<Option<StoredFiling>, StoreError> {
        match self.filings.get(accession)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Key of the date index; lexicographic order equals chronological order
fn date_key(date: NaiveDate, accession: &AccessionNumber) -> String {
    format!("{}|{}", date.format("%Y-%m-%d"), accession)
}

/// Inclusive key range covering every filing dated within `[start, end]`
fn date_range(start: NaiveDate, end: NaiveDate) -> (String, String) {
    (
        format!("{}|", start.format("%Y-%m-%d")),
        format!("{}|~", end.format("%Y-%m-%d")),
    )
}

impl MirrorStore for SledMirror {
    fn upsert_companies(&self, companies: &[Company]) -> Result<usize, StoreError> {
        let mut batch = sled::Batch::default();
        for company in companies {
            batch.insert(company.cik.as_str().as_bytes(), bincode::serialize(company)?);
        }
        self.companies.apply_batch(batch)?;
        Ok(companies.len())
    }

    fn insert_filings(&self, filings: &[Filing]) -> Result<InsertOutcome, StoreError> {
        let mut outcome = InsertOutcome::default();
        for filing in filings {
            if self.insert_filing(filing)? {
                outcome.inserted += 1;
            } else {
                outcome.already_present += 1;
            }
        }
        Ok(outcome)
    }

    fn company(&self, cik: &Cik) -> Result<Option<Company>, StoreError> {
        match self.companies.get(cik.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn filing(&self, accession: &AccessionNumber) -> Result<Option<StoredFiling>, StoreError> {
        self.decode_filing(accession.as_str().as_bytes())
    }

    fn accessions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<HashSet<AccessionNumber>, StoreError> {
        let (lo, hi) = date_range(start, end);
        let mut accessions = HashSet::new();
        for entry in self.by_date.range(lo.as_bytes()..=hi.as_bytes()) {
            let (_, accession) = entry?;
            match std::str::from_utf8(&accession).ok().and_then(AccessionNumber::parse) {
                Some(acc) => {
                    accessions.insert(acc);
                }
                None => warn!("Ignoring malformed date index entry {:?}", accession),
            }
        }
        Ok(accessions)
    }

    fn find_filings(&self, query: &FilingQuery) -> Result<Vec<FilingRecord>, StoreError> {
        if query.start_date > query.end_date {
            return Ok(Vec::new());
        }

        let (lo, hi) = date_range(query.start_date, query.end_date);
        let mut companies: HashMap<Cik, Option<Company>> = HashMap::new();
        let mut records = Vec::new();

        for entry in self.by_date.range(lo.as_bytes()..=hi.as_bytes()).rev() {
            if query.limit.is_some_and(|limit| records.len() >= limit) {
                break;
            }

            let (_, accession) = entry?;
            let Some(stored) = self.decode_filing(&accession)? else {
                warn!("Date index points at missing filing {:?}", accession);
                continue;
            };
            if !query.accepts_filing(&stored.filing) {
                continue;
            }

            let company = match companies.get(&stored.filing.cik) {
                Some(cached) => cached.clone(),
                None => {
                    let company = self.company(&stored.filing.cik)?;
                    companies.insert(stored.filing.cik.clone(), company.clone());
                    company
                }
            };
            let Some(company) = company else {
                continue;
            };
            if !query.accepts_company(&company) {
                continue;
            }

            records.push(FilingRecord {
                id: stored.id,
                filing: stored.filing,
                company_name: company.name,
                sic: company.sic,
            });
        }

        Ok(records)
    }

    fn counts(&self) -> Result<MirrorCounts, StoreError> {
        Ok(MirrorCounts {
            companies: self.companies.len(),
            filings: self.filings.len(),
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
