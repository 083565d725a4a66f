//! Bounded, rate-limited document downloads

use super::resolver::{FilingResolver, ResolvedDocument};
use super::RetrievalError;
use crate::config::PipelineConfig;
use crate::progress::{RunProgress, RunStats};
use crate::registry::RegistrySource;
use crate::store::{FilingQuery, MirrorStore};
use crate::types::{AccessionNumber, Cik, FilingRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Longest local filename kept after sanitizing
const MAX_FILENAME_LEN: usize = 200;

/// What happened to one selected filing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded { bytes: u64 },
    AlreadyPresent,
    Excluded,
    Failed { error: String },
}

impl DownloadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloaded { .. } => "downloaded",
            Self::AlreadyPresent => "already_present",
            Self::Excluded => "excluded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// One attempted filing
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: ResolvedDocument,
    /// Local path, absent for excluded filings
    pub path: Option<PathBuf>,
    pub status: DownloadStatus,
}

/// Result of a download run
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Attempted filings, newest first
    pub outcomes: Vec<DocumentOutcome>,
    pub stats: RunStats,
}

impl DownloadReport {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DownloadStatus::Failed { .. }))
            .count()
    }
}

/// Replace characters outside `[A-Za-z0-9._-]`, collapse underscores and
/// cap the length while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    // Only ASCII remains, so byte offsets are char boundaries
    if out.len() > MAX_FILENAME_LEN {
        match out.rfind('.') {
            Some(dot) if dot > 0 && out.len() - dot < MAX_FILENAME_LEN => {
                let ext = out[dot..].to_string();
                out.truncate(MAX_FILENAME_LEN - ext.len());
                out.push_str(&ext);
            }
            _ => out.truncate(MAX_FILENAME_LEN),
        }
    }

    if out.is_empty() {
        out.push_str("document");
    }
    out
}

/// Local name of a downloaded document: `<cik>_<accession without dashes>_<name>`
pub fn document_file_name(cik: &Cik, accession: &AccessionNumber, filename: &str) -> String {
    format!(
        "{}_{}_{}",
        cik,
        accession.without_dashes(),
        sanitize_filename(filename)
    )
}

/// Query, resolve and download the primary documents of mirrored filings
pub struct DocumentFetcher {
    source: Arc<dyn RegistrySource>,
    store: Arc<dyn MirrorStore>,
    resolver: Arc<FilingResolver>,
    document_dir: PathBuf,
    network_concurrency: usize,
    download_concurrency: usize,
    skip_existing: bool,
    quiet: bool,
}

impl DocumentFetcher {
    pub fn new(
        source: Arc<dyn RegistrySource>,
        store: Arc<dyn MirrorStore>,
        resolver: FilingResolver,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            store,
            resolver: Arc::new(resolver),
            document_dir: config.document_dir(),
            network_concurrency: config.network_concurrency.max(1),
            download_concurrency: config.download_concurrency.max(1),
            skip_existing: config.skip_existing,
            quiet: false,
        }
    }

    /// Set quiet mode (no progress bar or summary)
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency.max(1);
        self
    }

    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub fn document_dir(&self) -> &Path {
        &self.document_dir
    }

    /// Download the documents selected by `query`.
    ///
    /// `max_downloads` caps the number of documents actually fetched, taken
    /// from the most recent filings first. Excluded and already present
    /// documents do not count against the cap.
    pub async fn run(&self, query: &FilingQuery, max_downloads: Option<usize>) -> Result<DownloadReport, RetrievalError> {
        tokio::fs::create_dir_all(&self.document_dir).await?;

        let mut records = {
            let store = Arc::clone(&self.store);
            let query = query.clone();
            tokio::task::spawn_blocking(move || store.find_filings(&query)).await??
        };
        records.sort_by(|a, b| b.filing.filing_date.cmp(&a.filing.filing_date));
        info!("{} filings match the query", records.len());

        let progress = RunProgress::new("Document Download", Some(records.len() as u64), self.quiet);
        let (mut outcomes, pending) = self.prepare(records, max_downloads, &progress).await?;
        info!(
            "{} documents to download, {} excluded or already present",
            pending.len(),
            outcomes.len()
        );
        progress.set_total((outcomes.len() + pending.len()) as u64);

        outcomes.extend(self.download_all(pending, &progress).await?);
        outcomes.sort_by(|a, b| {
            b.document
                .record
                .filing
                .filing_date
                .cmp(&a.document.record.filing.filing_date)
                .then_with(|| {
                    a.document
                        .record
                        .filing
                        .accession_number
                        .cmp(&b.document.record.filing.accession_number)
                })
        });

        progress.finish();
        if !self.quiet {
            progress.print_summary();
        }

        Ok(DownloadReport {
            outcomes,
            stats: progress.get_stats(),
        })
    }

    /// Resolve records window by window until the download cap is reached.
    ///
    /// Returns the outcomes settled without a download and the documents
    /// still to fetch with their destination paths.
    async fn prepare(
        &self,
        records: Vec<FilingRecord>,
        max_downloads: Option<usize>,
        progress: &RunProgress,
    ) -> Result<(Vec<DocumentOutcome>, Vec<(ResolvedDocument, PathBuf)>), RetrievalError> {
        let mut settled = Vec::new();
        let mut pending = Vec::new();
        let cap = max_downloads.unwrap_or(usize::MAX);

        'windows: for window in records.chunks(self.network_concurrency) {
            let handles: Vec<_> = window
                .iter()
                .cloned()
                .map(|record| {
                    let resolver = Arc::clone(&self.resolver);
                    tokio::spawn(async move { resolver.resolve(&record).await })
                })
                .collect();

            let mut handles = handles.into_iter();
            while let Some(handle) = handles.next() {
                let document = handle.await?;
                let filing = &document.record.filing;

                if document.excluded {
                    debug!("Not downloading excluded filing {}", filing.accession_number);
                    progress.unit_skipped(filing.accession_number.as_str());
                    settled.push(DocumentOutcome {
                        document,
                        path: None,
                        status: DownloadStatus::Excluded,
                    });
                    continue;
                }

                let path = self.document_dir.join(document_file_name(
                    &filing.cik,
                    &filing.accession_number,
                    &document.filename,
                ));
                if self.skip_existing && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    debug!("Skipping existing {}", path.display());
                    progress.unit_skipped(filing.accession_number.as_str());
                    settled.push(DocumentOutcome {
                        document,
                        path: Some(path),
                        status: DownloadStatus::AlreadyPresent,
                    });
                    continue;
                }

                if pending.len() >= cap {
                    info!("Reached the limit of {} downloads", cap);
                    // Unresolved filings of this window would only spend requests
                    handles.by_ref().for_each(|rest| rest.abort());
                    break 'windows;
                }
                pending.push((document, path));
            }
        }

        Ok((settled, pending))
    }

    async fn download_all(
        &self,
        pending: Vec<(ResolvedDocument, PathBuf)>,
        progress: &RunProgress,
    ) -> Result<Vec<DocumentOutcome>, RetrievalError> {
        let semaphore = Arc::new(Semaphore::new(self.download_concurrency));
        let mut handles = Vec::with_capacity(pending.len());

        for (document, path) in pending {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| RetrievalError::Task(e.to_string()))?;
            let source = Arc::clone(&self.source);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = source.download_document(&document.url, &path).await;
                (document, path, result)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let (document, path, result) = handle.await?;
            let accession = document.record.filing.accession_number.clone();
            let status = match result {
                Ok(bytes) => {
                    debug!("Downloaded {} ({} bytes)", path.display(), bytes);
                    progress.unit_succeeded(accession.as_str());
                    DownloadStatus::Downloaded { bytes }
                }
                Err(e) => {
                    warn!("Download failed for {} from {}: {}", accession, document.url, e);
                    progress.unit_failed(accession.as_str());
                    DownloadStatus::Failed { error: e.to_string() }
                }
            };
            outcomes.push(DocumentOutcome {
                document,
                path: Some(path),
                status,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterConfig, RegistryConfig};
    use crate::registry::{RegistryError, RegistryUrls};
    use crate::store::SledMirror;
    use crate::types::{Company, Filing};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ========================================================================
    // Filename tests
    // ========================================================================

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("aapl-20230930.htm"), "aapl-20230930.htm");
        assert_eq!(sanitize_filename("annual report (final).htm"), "annual_report_final_.htm");
        assert_eq!(sanitize_filename("a//b??c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("  "), "document");
    }

    #[test]
    fn test_sanitize_filename_caps_length_keeping_extension() {
        let long = format!("{}.html", "x".repeat(300));
        let clean = sanitize_filename(&long);
        assert_eq!(clean.len(), 200);
        assert!(clean.ends_with(".html"));
    }

    #[test]
    fn test_document_file_name() {
        let name = document_file_name(
            &Cik::parse("320193").unwrap(),
            &AccessionNumber::parse("0000320193-23-000106").unwrap(),
            "aapl 2023.htm",
        );
        assert_eq!(name, "0000320193_000032019323000106_aapl_2023.htm");
    }

    // ========================================================================
    // Download run tests
    // ========================================================================

    /// Serves one rich-format index page per filing and writes documents to disk
    #[derive(Default)]
    struct DocumentRegistry {
        excluded: HashSet<String>,
        broken_downloads: HashSet<String>,
        slow_indexes: HashSet<String>,
        resolved: Mutex<Vec<String>>,
        downloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RegistrySource for DocumentRegistry {
        async fn download_bulk_archive(&self, _dest: &Path) -> Result<u64, RegistryError> {
            Err(RegistryError::NotFound("bulk".into()))
        }
        async fn fetch_daily_index(&self, date: NaiveDate) -> Result<Vec<u8>, RegistryError> {
            Err(RegistryError::NotFound(date.to_string()))
        }
        async fn fetch_quarterly_index(&self, _year: i32, _quarter: u32) -> Result<Vec<u8>, RegistryError> {
            Err(RegistryError::NotFound("quarterly".into()))
        }
        async fn fetch_company_profile(&self, _cik: &Cik) -> Result<Option<serde_json::Value>, RegistryError> {
            Ok(None)
        }
        async fn fetch_filing_index(&self, _cik: &Cik, acc: &AccessionNumber) -> Result<String, RegistryError> {
            if self.slow_indexes.contains(acc.as_str()) {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            }
            self.resolved.lock().unwrap().push(acc.to_string());
            let exhibit = if self.excluded.contains(acc.as_str()) {
                r#"<tr><td>2</td><td>compliance</td><td><a href="/x">ex33.htm</a></td><td>EX-33</td><td>1</td></tr>"#
            } else {
                ""
            };
            Ok(format!(
                r#"<table class="tableFile"><tr><th>Seq</th></tr>
<tr><td>1</td><td>annual</td><td><a href="/x">doc-{}.htm</a></td><td>10-K</td><td>1</td></tr>{}</table>"#,
                acc.without_dashes(),
                exhibit
            ))
        }
        async fn download_document(&self, url: &str, dest: &Path) -> Result<u64, RegistryError> {
            self.downloads.lock().unwrap().push(url.to_string());
            if self.broken_downloads.iter().any(|b| url.contains(b.as_str())) {
                return Err(RegistryError::Status {
                    status: 500,
                    url: url.to_string(),
                });
            }
            tokio::fs::write(dest, b"<html>report</html>").await?;
            Ok(19)
        }
    }

    fn filing(cik: &str, day: u32, seq: u32) -> Filing {
        let accession = format!("{:0>10}-23-{:06}", cik, seq);
        Filing {
            cik: Cik::parse(cik).unwrap(),
            form_type: "10-K".into(),
            filing_date: NaiveDate::from_ymd_opt(2023, 3, day).unwrap(),
            accession_number: AccessionNumber::parse(&accession).unwrap(),
            filename: format!("{}.txt", accession),
        }
    }

    fn seeded_store(filings: &[Filing]) -> Arc<SledMirror> {
        let store = SledMirror::temporary().unwrap();
        let companies: Vec<Company> = filings
            .iter()
            .map(|f| Company::new(f.cik.clone(), format!("Company {}", f.cik)))
            .collect();
        store.upsert_companies(&companies).unwrap();
        store.insert_filings(filings).unwrap();
        Arc::new(store)
    }

    fn fetcher(registry: Arc<DocumentRegistry>, store: Arc<SledMirror>, dir: &TempDir) -> DocumentFetcher {
        fetcher_with_window(registry, store, dir, 2)
    }

    fn fetcher_with_window(
        registry: Arc<DocumentRegistry>,
        store: Arc<SledMirror>,
        dir: &TempDir,
        network_concurrency: usize,
    ) -> DocumentFetcher {
        let pipeline = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            network_concurrency,
            download_concurrency: 2,
            ..PipelineConfig::default()
        };
        let resolver = FilingResolver::new(
            registry.clone(),
            RegistryUrls::new(&RegistryConfig::default()),
            &pipeline.target_forms,
            &FilterConfig::default(),
        );
        DocumentFetcher::new(registry, store, resolver, &pipeline).with_quiet(true)
    }

    fn query() -> FilingQuery {
        FilingQuery::for_years(2023, 2023, &["10-K".to_string()], &FilterConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_downloads_and_skips_existing() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(DocumentRegistry::default());
        let store = seeded_store(&[filing("1001", 1, 1), filing("2002", 2, 2)]);
        let fetcher = fetcher(registry.clone(), store, &dir);

        let first = fetcher.run(&query(), None).await.unwrap();
        assert_eq!(first.outcomes.len(), 2);
        assert!(first
            .outcomes
            .iter()
            .all(|o| matches!(o.status, DownloadStatus::Downloaded { .. })));
        let expected = fetcher
            .document_dir()
            .join("0000001001_000000100123000001_doc-000000100123000001.htm");
        assert!(expected.exists());

        let second = fetcher.run(&query(), None).await.unwrap();
        assert!(second
            .outcomes
            .iter()
            .all(|o| o.status == DownloadStatus::AlreadyPresent));
        assert_eq!(registry.downloads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_excluded_filing_is_reported_but_not_fetched() {
        let dir = TempDir::new().unwrap();
        let mut registry = DocumentRegistry::default();
        registry.excluded.insert("0000001001-23-000001".into());
        let registry = Arc::new(registry);
        let store = seeded_store(&[filing("1001", 1, 1), filing("2002", 2, 2)]);

        let report = fetcher(registry.clone(), store, &dir).run(&query(), None).await.unwrap();

        let excluded: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| o.status == DownloadStatus::Excluded)
            .collect();
        assert_eq!(excluded.len(), 1);
        assert!(excluded[0].path.is_none());
        let downloads = registry.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1);
        assert!(downloads[0].contains("/2002/"));
    }

    #[tokio::test]
    async fn test_max_downloads_takes_newest_first() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(DocumentRegistry::default());
        let store = seeded_store(&[filing("1001", 1, 1), filing("2002", 5, 2), filing("3003", 9, 3)]);

        let report = fetcher(registry.clone(), store, &dir).run(&query(), Some(2)).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        let dates: Vec<u32> = report
            .outcomes
            .iter()
            .map(|o| chrono::Datelike::day(&o.document.record.filing.filing_date))
            .collect();
        assert_eq!(dates, vec![9, 5]);
    }

    #[tokio::test]
    async fn test_reaching_the_cap_cancels_outstanding_resolutions() {
        let dir = TempDir::new().unwrap();
        let mut registry = DocumentRegistry::default();
        registry.slow_indexes.insert("0000001001-23-000001".into());
        let registry = Arc::new(registry);
        let store = seeded_store(&[filing("1001", 1, 1), filing("2002", 5, 2), filing("3003", 9, 3)]);

        // All three filings resolve in one window; the cap is hit on the
        // second, so the slow third lookup must not finish afterwards
        let report = fetcher_with_window(registry.clone(), store, &dir, 3)
            .run(&query(), Some(1))
            .await
            .unwrap();
        assert_eq!(report.outcomes.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        let resolved = registry.resolved.lock().unwrap().clone();
        assert_eq!(resolved.len(), 2);
        assert!(!resolved.contains(&"0000001001-23-000001".to_string()));
        assert_eq!(registry.downloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_download_does_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let mut registry = DocumentRegistry::default();
        registry.broken_downloads.insert("/1001/".into());
        let registry = Arc::new(registry);
        let store = seeded_store(&[filing("1001", 1, 1), filing("2002", 2, 2)]);

        let report = fetcher(registry, store, &dir).run(&query(), None).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.succeeded, 1);
        let failed = report
            .outcomes
            .iter()
            .find(|o| o.status.label() == "failed")
            .unwrap();
        assert!(failed.status.error().unwrap().contains("500"));
        assert!(!failed.path.as_ref().unwrap().exists());
    }
}
