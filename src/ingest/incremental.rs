//! Incremental catch-up from daily change listings
//!
//! Fetches the most recent daily listings, inserts the filings the mirror has
//! not seen, then refreshes entity profiles for every listed entity that is
//! unknown or incomplete.

use super::{write_batch, IngestError};
use crate::config::PipelineConfig;
use crate::parsing::{parse_company_profile, parse_master_index};
use crate::progress::{RunProgress, RunStats};
use crate::registry::{decode_listing, RegistrySource};
use crate::store::MirrorStore;
use crate::types::{AccessionNumber, Cik, Company, Filing};
use chrono::{Duration, Local, NaiveDate};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Orchestrates an incremental update run
pub struct IncrementalUpdater {
    source: Arc<dyn RegistrySource>,
    store: Arc<dyn MirrorStore>,
    config: PipelineConfig,
    quiet: bool,
}

impl IncrementalUpdater {
    pub fn new(source: Arc<dyn RegistrySource>, store: Arc<dyn MirrorStore>, config: PipelineConfig) -> Self {
        Self {
            source,
            store,
            config,
            quiet: false,
        }
    }

    /// Set quiet mode (no summary output)
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Catch up on the configured number of days ending today
    pub async fn run(&self, days_back: Option<u32>) -> Result<RunStats, IngestError> {
        let days = days_back.unwrap_or(self.config.incremental_days);
        self.run_until(Local::now().date_naive(), days).await
    }

    /// Catch up on the `days` calendar days ending at `today`, oldest first
    pub async fn run_until(&self, today: NaiveDate, days: u32) -> Result<RunStats, IngestError> {
        if days == 0 {
            return Err(IngestError::Invalid("days_back must be positive".to_string()));
        }

        let progress = RunProgress::new("Incremental Update", None, self.quiet);
        let filings = self.collect_feeds(today, days, &progress).await;
        info!("Daily listings returned {} distinct filings", filings.len());

        // Every listed entity is a candidate, so a lookup that failed on an
        // earlier run is retried even when its filings are already mirrored
        let ciks: BTreeSet<Cik> = filings.iter().map(|f| f.cik.clone()).collect();

        let new_filings = self.new_filings(filings)?;
        if new_filings.is_empty() {
            info!("No new filings");
        } else {
            let (_, outcome) = write_batch(&self.store, Vec::new(), new_filings).await?;
            progress.filings_written(outcome);
            info!("Inserted {} new filings", outcome.inserted);
        }

        let refreshed = self.refresh_profiles(ciks, &progress).await?;
        if !refreshed.is_empty() {
            let (written, _) = write_batch(&self.store, refreshed, Vec::new()).await?;
            progress.companies_written(written);
        }

        self.store.flush()?;
        progress.finish();
        if !self.quiet {
            progress.print_summary();
        }
        Ok(progress.get_stats())
    }

    /// Fetch and parse each daily listing, merging filings by accession number
    async fn collect_feeds(&self, today: NaiveDate, days: u32, progress: &RunProgress) -> Vec<Filing> {
        let mut seen: HashSet<AccessionNumber> = HashSet::new();
        let mut filings = Vec::new();

        for offset in (0..days).rev() {
            let date = today - Duration::days(offset as i64);
            let label = date.to_string();

            let bytes = match self.source.fetch_daily_index(date).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_missing() => {
                    info!("No daily listing for {} (weekend or holiday)", date);
                    progress.unit_skipped(&label);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to fetch daily listing for {}: {}", date, e);
                    progress.unit_failed(&label);
                    continue;
                }
            };

            match parse_master_index(&decode_listing(&bytes), None) {
                Ok(listing) => {
                    debug!(
                        "Listing for {}: {} filings, {} malformed lines",
                        date,
                        listing.filings.len(),
                        listing.skipped_lines
                    );
                    for filing in listing.filings {
                        if seen.insert(filing.accession_number.clone()) {
                            filings.push(filing);
                        }
                    }
                    progress.unit_succeeded(&label);
                }
                Err(e) => {
                    warn!("Failed to parse daily listing for {}: {}", date, e);
                    progress.unit_failed(&label);
                }
            }
        }

        filings
    }

    /// Filings whose accession numbers are not yet mirrored
    fn new_filings(&self, filings: Vec<Filing>) -> Result<Vec<Filing>, IngestError> {
        let (Some(start), Some(end)) = (
            filings.iter().map(|f| f.filing_date).min(),
            filings.iter().map(|f| f.filing_date).max(),
        ) else {
            return Ok(Vec::new());
        };

        let existing = self.store.accessions_between(start, end)?;
        Ok(filings
            .into_iter()
            .filter(|f| !existing.contains(&f.accession_number))
            .collect())
    }

    /// Look up profiles for entities that are unknown or incomplete.
    ///
    /// A failed lookup is logged and counted; it never blocks the others.
    async fn refresh_profiles(&self, ciks: BTreeSet<Cik>, progress: &RunProgress) -> Result<Vec<Company>, IngestError> {
        let mut pending = Vec::new();
        for cik in ciks {
            match self.store.company(&cik)? {
                Some(company) if !company.needs_refresh() => {}
                _ => pending.push(cik),
            }
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!("Refreshing {} entity profiles", pending.len());

        let semaphore = Arc::new(Semaphore::new(self.config.network_concurrency.max(1)));
        let mut handles = Vec::with_capacity(pending.len());
        for cik in pending {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| IngestError::Task(e.to_string()))?;
            let source = Arc::clone(&self.source);
            progress.lookup_issued();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = source.fetch_company_profile(&cik).await;
                (cik, result)
            }));
        }

        let mut companies = Vec::new();
        for handle in handles {
            let (cik, result) = handle.await?;
            match result {
                Ok(Some(value)) => {
                    companies.push(parse_company_profile(&cik, &value));
                    progress.unit_succeeded(cik.as_str());
                }
                Ok(None) => {
                    warn!("Registry has no profile for CIK {}", cik);
                    progress.unit_skipped(cik.as_str());
                }
                Err(e) => {
                    warn!("Profile lookup failed for CIK {}: {}", cik, e);
                    progress.unit_failed(cik.as_str());
                }
            }
        }
        Ok(companies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use crate::store::SledMirror;
    use crate::types::BusinessAddress;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Serves canned listings and profiles, counting profile lookups
    #[derive(Default)]
    struct CannedRegistry {
        listings: HashMap<NaiveDate, String>,
        profiles: HashMap<String, serde_json::Value>,
        failing_profiles: HashSet<String>,
        lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RegistrySource for CannedRegistry {
        async fn download_bulk_archive(&self, _dest: &Path) -> Result<u64, RegistryError> {
            Err(RegistryError::NotFound("bulk".into()))
        }
        async fn fetch_daily_index(&self, date: NaiveDate) -> Result<Vec<u8>, RegistryError> {
            self.listings
                .get(&date)
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| RegistryError::Status { status: 403, url: date.to_string() })
        }
        async fn fetch_quarterly_index(&self, _year: i32, _quarter: u32) -> Result<Vec<u8>, RegistryError> {
            Err(RegistryError::NotFound("quarterly".into()))
        }
        async fn fetch_company_profile(&self, cik: &Cik) -> Result<Option<serde_json::Value>, RegistryError> {
            self.lookups.lock().unwrap().push(cik.to_string());
            if self.failing_profiles.contains(cik.as_str()) {
                return Err(RegistryError::RetriesExhausted {
                    url: cik.to_string(),
                    attempts: 3,
                    last_error: "status 503".into(),
                });
            }
            Ok(self.profiles.get(cik.as_str()).cloned())
        }
        async fn fetch_filing_index(&self, _cik: &Cik, _acc: &AccessionNumber) -> Result<String, RegistryError> {
            Err(RegistryError::NotFound("index".into()))
        }
        async fn download_document(&self, _url: &str, _dest: &Path) -> Result<u64, RegistryError> {
            Err(RegistryError::NotFound("document".into()))
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn listing(rows: &[&str]) -> String {
        let mut text = String::from(
            "Description: Daily Index\n\nCIK|Company Name|Form Type|Date Filed|Filename\n--------------\n",
        );
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    fn registry() -> CannedRegistry {
        let mut registry = CannedRegistry::default();
        registry.listings.insert(
            date(4),
            listing(&[
                "1001|Alpha Corp|10-K|2024-03-04|edgar/data/1001/0001001000-24-000001.txt",
                "1001|Alpha Corp|8-K|2024-03-04|edgar/data/1001/0001001000-24-000002.txt",
            ]),
        );
        registry.listings.insert(
            date(5),
            listing(&[
                "2002|Beta Inc|10-Q|2024-03-05|edgar/data/2002/0002002000-24-000001.txt",
                // Republished row from the previous day
                "1001|Alpha Corp|10-K|2024-03-04|edgar/data/1001/0001001000-24-000001.txt",
            ]),
        );
        registry.profiles.insert(
            "0000001001".into(),
            json!({"name": "Alpha Corp", "sic": "3711", "addresses": {"business": {"city": "DETROIT"}}}),
        );
        registry.profiles.insert(
            "0000002002".into(),
            json!({"name": "Beta Inc", "sic": "6726", "addresses": {"business": {"city": "BOSTON"}}}),
        );
        registry
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            network_concurrency: 4,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_filings_from_unknown_entities() {
        let registry = Arc::new(registry());
        let store = Arc::new(SledMirror::temporary().unwrap());
        let updater = IncrementalUpdater::new(registry.clone(), store.clone(), config()).with_quiet(true);

        let stats = updater.run_until(date(6), 3).await.unwrap();

        assert_eq!(stats.filings_inserted, 3);
        assert_eq!(stats.profile_lookups, 2);
        assert_eq!(stats.companies_upserted, 2);
        assert_eq!(registry.lookups.lock().unwrap().len(), 2);
        assert_eq!(store.counts().unwrap().companies, 2);
        assert_eq!(store.counts().unwrap().filings, 3);

        let beta = store.company(&Cik::parse("2002").unwrap()).unwrap().unwrap();
        assert_eq!(beta.sic.as_deref(), Some("6726"));
    }

    #[tokio::test]
    async fn test_second_run_inserts_nothing() {
        let registry = Arc::new(registry());
        let store = Arc::new(SledMirror::temporary().unwrap());
        let updater = IncrementalUpdater::new(registry.clone(), store.clone(), config()).with_quiet(true);

        updater.run_until(date(6), 3).await.unwrap();
        let second = updater.run_until(date(6), 3).await.unwrap();

        assert_eq!(second.filings_inserted, 0);
        assert_eq!(second.profile_lookups, 0);
        assert_eq!(registry.lookups.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_profiles_are_not_refetched() {
        let registry = Arc::new(registry());
        let store = Arc::new(SledMirror::temporary().unwrap());

        let mut alpha = Company::new(Cik::parse("1001").unwrap(), "Alpha Corp");
        alpha.sic = Some("3711".into());
        alpha.business_address = Some(BusinessAddress::default());
        let beta = Company::new(Cik::parse("2002").unwrap(), "Beta Inc");
        store.upsert_companies(&[alpha, beta]).unwrap();

        let updater = IncrementalUpdater::new(registry.clone(), store.clone(), config()).with_quiet(true);
        let stats = updater.run_until(date(6), 3).await.unwrap();

        assert_eq!(stats.profile_lookups, 1);
        assert_eq!(*registry.lookups.lock().unwrap(), vec!["0000002002".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_block_others() {
        let mut registry = registry();
        registry.failing_profiles.insert("0000001001".into());
        let registry = Arc::new(registry);
        let store = Arc::new(SledMirror::temporary().unwrap());
        let updater = IncrementalUpdater::new(registry.clone(), store.clone(), config()).with_quiet(true);

        let stats = updater.run_until(date(6), 3).await.unwrap();

        assert_eq!(stats.filings_inserted, 3);
        assert_eq!(stats.companies_upserted, 1);
        assert!(stats.failed >= 1);
        assert!(store.company(&Cik::parse("1001").unwrap()).unwrap().is_none());
        assert!(store.company(&Cik::parse("2002").unwrap()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried_on_next_run() {
        let store = Arc::new(SledMirror::temporary().unwrap());
        let alpha = Cik::parse("1001").unwrap();

        let mut failing = registry();
        failing.failing_profiles.insert("0000001001".into());
        let updater = IncrementalUpdater::new(Arc::new(failing), store.clone(), config()).with_quiet(true);
        let first = updater.run_until(date(6), 3).await.unwrap();
        assert_eq!(first.filings_inserted, 3);
        assert!(store.company(&alpha).unwrap().is_none());

        // Same listings, healthy endpoint: no new filings, but the missing
        // entity is looked up again
        let healthy = Arc::new(registry());
        let updater = IncrementalUpdater::new(healthy.clone(), store.clone(), config()).with_quiet(true);
        let second = updater.run_until(date(6), 3).await.unwrap();

        assert_eq!(second.filings_inserted, 0);
        assert_eq!(second.profile_lookups, 1);
        assert_eq!(*healthy.lookups.lock().unwrap(), vec!["0000001001".to_string()]);
        let company = store.company(&alpha).unwrap().unwrap();
        assert_eq!(company.name, "Alpha Corp");
        assert_eq!(store.counts().unwrap().companies, 2);
    }

    #[tokio::test]
    async fn test_zero_days_rejected() {
        let store = Arc::new(SledMirror::temporary().unwrap());
        let updater = IncrementalUpdater::new(Arc::new(registry()), store, config()).with_quiet(true);
        assert!(matches!(
            updater.run_until(date(6), 0).await,
            Err(IngestError::Invalid(_))
        ));
    }
}
