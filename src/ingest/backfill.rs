//! Historical backfill from quarterly full-index listings

use super::{write_batch, IngestError};
use crate::parsing::parse_master_index;
use crate::progress::{CancelToken, RunProgress, RunStats};
use crate::registry::{decode_listing, quarter_of, RegistrySource};
use crate::store::MirrorStore;
use chrono::{Datelike, Local, NaiveDate};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Inserts filings from every quarter of a year range
pub struct Backfiller {
    source: Arc<dyn RegistrySource>,
    store: Arc<dyn MirrorStore>,
    forms: Option<HashSet<String>>,
    quiet: bool,
    cancel: CancelToken,
}

impl Backfiller {
    /// `forms` restricts the filings kept; an empty list keeps every form
    pub fn new(source: Arc<dyn RegistrySource>, store: Arc<dyn MirrorStore>, forms: &[String]) -> Self {
        let forms = if forms.is_empty() {
            None
        } else {
            Some(forms.iter().map(|f| f.trim().to_uppercase()).collect())
        };
        Self {
            source,
            store,
            forms,
            quiet: false,
            cancel: CancelToken::new(),
        }
    }

    /// Set quiet mode (no progress bar or summary)
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Stop between quarters once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, start_year: i32, end_year: i32) -> Result<RunStats, IngestError> {
        self.run_until(Local::now().date_naive(), start_year, end_year).await
    }

    /// Backfill the inclusive year range, ignoring quarters that start after `today`
    pub async fn run_until(&self, today: NaiveDate, start_year: i32, end_year: i32) -> Result<RunStats, IngestError> {
        if start_year > end_year {
            return Err(IngestError::Invalid(format!(
                "start year {} is after end year {}",
                start_year, end_year
            )));
        }

        let quarters: Vec<(i32, u32)> = (start_year..=end_year)
            .flat_map(|year| (1..=4).map(move |q| (year, q)))
            .filter(|&(year, q)| (year, q) <= (today.year(), quarter_of(today)))
            .collect();

        let progress =
            RunProgress::new("Backfill", Some(quarters.len() as u64), self.quiet).with_cancel(self.cancel.clone());
        info!("Backfilling {} quarters from {} to {}", quarters.len(), start_year, end_year);

        for (year, quarter) in quarters {
            if progress.is_cancelled() {
                info!("Backfill cancelled");
                break;
            }
            let label = format!("{} QTR{}", year, quarter);

            let bytes = match self.source.fetch_quarterly_index(year, quarter).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_missing() => {
                    info!("No full index for {}", label);
                    progress.unit_skipped(&label);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to fetch full index for {}: {}", label, e);
                    progress.unit_failed(&label);
                    continue;
                }
            };

            let listing = match parse_master_index(&decode_listing(&bytes), self.forms.as_ref()) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Failed to parse full index for {}: {}", label, e);
                    progress.unit_failed(&label);
                    continue;
                }
            };

            let (_, outcome) = write_batch(&self.store, Vec::new(), listing.filings).await?;
            progress.filings_written(outcome);
            info!(
                "{}: {} new filings, {} already mirrored",
                label, outcome.inserted, outcome.already_present
            );
            progress.unit_succeeded(&label);
        }

        self.store.flush()?;
        progress.finish();
        if !self.quiet {
            progress.print_summary();
        }
        Ok(progress.get_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use crate::store::SledMirror;
    use crate::types::{AccessionNumber, Cik};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct QuarterlyRegistry {
        quarters: HashMap<(i32, u32), String>,
        requested: Mutex<Vec<(i32, u32)>>,
    }

    #[async_trait]
    impl RegistrySource for QuarterlyRegistry {
        async fn download_bulk_archive(&self, _dest: &Path) -> Result<u64, RegistryError> {
            Err(RegistryError::NotFound("bulk".into()))
        }
        async fn fetch_daily_index(&self, date: NaiveDate) -> Result<Vec<u8>, RegistryError> {
            Err(RegistryError::NotFound(date.to_string()))
        }
        async fn fetch_quarterly_index(&self, year: i32, quarter: u32) -> Result<Vec<u8>, RegistryError> {
            self.requested.lock().unwrap().push((year, quarter));
            match self.quarters.get(&(year, quarter)) {
                Some(text) => Ok(text.as_bytes().to_vec()),
                None => Err(RegistryError::NotFound(format!("{} QTR{}", year, quarter))),
            }
        }
        async fn fetch_company_profile(&self, _cik: &Cik) -> Result<Option<serde_json::Value>, RegistryError> {
            Ok(None)
        }
        async fn fetch_filing_index(&self, _cik: &Cik, _acc: &AccessionNumber) -> Result<String, RegistryError> {
            Err(RegistryError::NotFound("index".into()))
        }
        async fn download_document(&self, _url: &str, _dest: &Path) -> Result<u64, RegistryError> {
            Err(RegistryError::NotFound("document".into()))
        }
    }

    const Q1_2023: &str = "Description: Master Index of EDGAR Dissemination Feed\n\
        \n\
        CIK|Company Name|Form Type|Date Filed|Filename\n\
        --------------------------------------------------------------------------------\n\
        1001|Alpha Corp|10-K|2023-02-15|edgar/data/1001/0001001000-23-000001.txt\n\
        1001|Alpha Corp|8-K|2023-02-20|edgar/data/1001/0001001000-23-000002.txt\n\
        2002|Beta Inc|10-K/A|2023-03-01|edgar/data/2002/0002002000-23-000003.txt\n";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 10).unwrap()
    }

    #[tokio::test]
    async fn test_backfill_filters_forms_and_skips_missing_quarters() {
        let mut registry = QuarterlyRegistry::default();
        registry.quarters.insert((2023, 1), Q1_2023.to_string());
        let registry = Arc::new(registry);
        let store = Arc::new(SledMirror::temporary().unwrap());

        let forms = vec!["10-K".to_string(), "10-k/a".to_string()];
        let backfiller = Backfiller::new(registry.clone(), store.clone(), &forms).with_quiet(true);
        let stats = backfiller.run_until(today(), 2023, 2023).await.unwrap();

        // Q3 and Q4 lie in the future and are never requested
        assert_eq!(*registry.requested.lock().unwrap(), vec![(2023, 1), (2023, 2)]);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.filings_inserted, 2);
        assert_eq!(store.counts().unwrap().filings, 2);
    }

    #[tokio::test]
    async fn test_backfill_is_idempotent() {
        let mut registry = QuarterlyRegistry::default();
        registry.quarters.insert((2023, 1), Q1_2023.to_string());
        let registry = Arc::new(registry);
        let store = Arc::new(SledMirror::temporary().unwrap());

        let backfiller = Backfiller::new(registry, store.clone(), &[]).with_quiet(true);
        let first = backfiller.run_until(today(), 2023, 2023).await.unwrap();
        let second = backfiller.run_until(today(), 2023, 2023).await.unwrap();

        assert_eq!(first.filings_inserted, 3);
        assert_eq!(second.filings_inserted, 0);
        assert_eq!(second.filings_already_present, 3);
    }

    #[tokio::test]
    async fn test_cancelled_backfill_stops_before_next_quarter() {
        let mut registry = QuarterlyRegistry::default();
        registry.quarters.insert((2023, 1), Q1_2023.to_string());
        let registry = Arc::new(registry);
        let store = Arc::new(SledMirror::temporary().unwrap());

        let cancel = CancelToken::new();
        cancel.cancel();
        let stats = Backfiller::new(registry.clone(), store.clone(), &[])
            .with_quiet(true)
            .with_cancel(cancel)
            .run_until(today(), 2023, 2023)
            .await
            .unwrap();

        assert!(registry.requested.lock().unwrap().is_empty());
        assert_eq!(stats.processed, 0);
        assert_eq!(store.counts().unwrap().filings, 0);
    }

    #[tokio::test]
    async fn test_backfill_rejects_inverted_range() {
        let store = Arc::new(SledMirror::temporary().unwrap());
        let backfiller = Backfiller::new(Arc::new(QuarterlyRegistry::default()), store, &[]).with_quiet(true);
        assert!(matches!(
            backfiller.run_until(today(), 2024, 2023).await,
            Err(IngestError::Invalid(_))
        ));
    }
}
