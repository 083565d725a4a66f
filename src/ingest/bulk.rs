//! Bulk snapshot ingestion
//!
//! Downloads the archive of per-entity records, extracts it, then parses the
//! files in chunks on a pool of blocking workers. Each worker returns an
//! independent [`ParsedSubmission`]; the results of a chunk are merged in one
//! place and written with idempotent operations, so re-running over the same
//! files leaves the mirror unchanged.

use super::{write_batch, IngestError};
use crate::config::PipelineConfig;
use crate::parsing::{parse_submission_file, submission_key, ParsedSubmission};
use crate::progress::{CancelToken, RunProgress, RunStats};
use crate::registry::RegistrySource;
use crate::store::MirrorStore;
use crate::types::{AccessionNumber, Cik, Company, Filing};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Which steps of a bulk run to perform
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkOptions {
    pub skip_download: bool,
    pub skip_extract: bool,
    pub skip_ingest: bool,
}

impl BulkOptions {
    /// Only ingest files already present on disk
    pub fn ingest_only() -> Self {
        Self {
            skip_download: true,
            skip_extract: true,
            skip_ingest: false,
        }
    }
}

/// Entities and filings of one chunk after merging
#[derive(Debug, Clone, Default)]
pub struct MergedBatch {
    pub companies: Vec<Company>,
    pub filings: Vec<Filing>,
    /// Filing records dropped by the parsers
    pub skipped_records: usize,
}

/// Merge worker results: entities by CIK with the last result winning,
/// filings deduplicated by accession number.
pub fn merge_submissions(parsed: impl IntoIterator<Item = ParsedSubmission>) -> MergedBatch {
    let mut companies: HashMap<Cik, Company> = HashMap::new();
    let mut seen: HashSet<AccessionNumber> = HashSet::new();
    let mut batch = MergedBatch::default();

    for submission in parsed {
        if let Some(company) = submission.company {
            companies.insert(company.cik.clone(), company);
        }
        for filing in submission.filings {
            if seen.insert(filing.accession_number.clone()) {
                batch.filings.push(filing);
            }
        }
        batch.skipped_records += submission.skipped_records;
    }

    batch.companies = companies.into_values().collect();
    batch.companies.sort_by(|a, b| a.cik.cmp(&b.cik));
    batch
}

/// Submission files under `dir`, in name order
pub fn list_submission_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Cannot read entry under {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| submission_key(name).is_some())
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Replace `dest` with the contents of the zip archive at `archive`.
///
/// Returns the number of files written.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, IngestError> {
    if dest.exists() {
        info!("Removing previous extraction at {}", dest.display());
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::create_dir_all(dest)?;

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    let mut extracted = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if !entry.is_file() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    info!("Extracted {} files to {}", extracted, dest.display());
    Ok(extracted)
}

/// Orchestrates a bulk snapshot run
pub struct BulkIngestor {
    source: Arc<dyn RegistrySource>,
    store: Arc<dyn MirrorStore>,
    config: PipelineConfig,
    quiet: bool,
    cancel: CancelToken,
}

impl BulkIngestor {
    pub fn new(source: Arc<dyn RegistrySource>, store: Arc<dyn MirrorStore>, config: PipelineConfig) -> Self {
        Self {
            source,
            store,
            config,
            quiet: false,
            cancel: CancelToken::new(),
        }
    }

    /// Set quiet mode (no progress output)
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Stop between chunks once `cancel` fires; written chunks are kept
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the selected steps: download, extract, ingest
    pub async fn run(&self, options: BulkOptions) -> Result<RunStats, IngestError> {
        let archive = self.config.archive_path();
        let submissions = self.config.submissions_dir();

        if !options.skip_download {
            std::fs::create_dir_all(&self.config.data_dir)?;
            info!("Downloading bulk archive to {}", archive.display());
            let bytes = self.source.download_bulk_archive(&archive).await?;
            info!("Downloaded {} MB", bytes / 1_000_000);
        }

        if !options.skip_extract {
            let (archive, submissions) = (archive.clone(), submissions.clone());
            tokio::task::spawn_blocking(move || extract_archive(&archive, &submissions)).await??;
        }

        if options.skip_ingest {
            return Ok(RunStats::default());
        }
        self.ingest_directory(&submissions).await
    }

    /// Parse and write every submission file under `dir`
    pub async fn ingest_directory(&self, dir: &Path) -> Result<RunStats, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::Invalid(format!(
                "submission directory {} does not exist",
                dir.display()
            )));
        }

        let files = {
            let dir = dir.to_path_buf();
            tokio::task::spawn_blocking(move || list_submission_files(&dir)).await?
        };
        info!(
            "Found {} submission files, parsing with {} workers",
            files.len(),
            self.config.bulk_workers
        );

        let progress =
            RunProgress::new("Bulk Ingestion", Some(files.len() as u64), self.quiet).with_cancel(self.cancel.clone());
        let chunk_size = self.config.file_chunk_size.max(1);
        let mut skipped_records = 0;

        for (index, chunk) in files.chunks(chunk_size).enumerate() {
            if progress.is_cancelled() {
                info!("Bulk ingestion cancelled");
                break;
            }
            debug!("Parsing chunk {} ({} files)", index + 1, chunk.len());

            let parsed = self.parse_chunk(chunk, &progress).await?;
            let merged = merge_submissions(parsed);
            skipped_records += merged.skipped_records;

            let (written, outcome) = write_batch(&self.store, merged.companies, merged.filings).await?;
            progress.companies_written(written);
            progress.filings_written(outcome);
        }

        self.store.flush()?;
        if skipped_records > 0 {
            info!("Skipped {} incomplete filing records", skipped_records);
        }

        progress.finish();
        if !self.quiet {
            progress.print_summary();
        }
        Ok(progress.get_stats())
    }

    /// Parse one chunk on the worker pool, preserving file order in the result
    async fn parse_chunk(&self, chunk: &[PathBuf], progress: &RunProgress) -> Result<Vec<ParsedSubmission>, IngestError> {
        let semaphore = Arc::new(Semaphore::new(self.config.bulk_workers.max(1)));
        let mut handles = Vec::with_capacity(chunk.len());

        for path in chunk {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| IngestError::Task(e.to_string()))?;
            let path = path.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = parse_submission_file(&path);
                (path, result)
            }));
        }

        let mut parsed = Vec::with_capacity(handles.len());
        for handle in handles {
            let (path, result) = handle.await?;
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match result {
                Ok(submission) => {
                    progress.unit_succeeded(name);
                    parsed.push(submission);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    progress.unit_failed(name);
                }
            }
        }
        Ok(parsed)
    }
}
