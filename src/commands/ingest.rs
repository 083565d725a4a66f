use super::{cancel_on_interrupt, Mirror};
use anyhow::{Context, Result};
use filing_mirror::{
    config::Config,
    ingest::{Backfiller, BulkIngestor, BulkOptions, IncrementalUpdater},
};
use std::path::PathBuf;
use tracing::info;

pub async fn bulk(config: Config, skip_download: bool, skip_extract: bool, skip_ingest: bool, quiet: bool) -> Result<()> {
    let mirror = Mirror::open(config)?;
    let ingestor = BulkIngestor::new(mirror.source, mirror.store, mirror.config.pipeline)
        .with_quiet(quiet)
        .with_cancel(cancel_on_interrupt());

    let stats = ingestor
        .run(BulkOptions {
            skip_download,
            skip_extract,
            skip_ingest,
        })
        .await
        .context("Bulk ingestion failed")?;

    info!(
        "Bulk ingestion finished: {} entities, {} new filings",
        stats.companies_upserted, stats.filings_inserted
    );
    Ok(())
}

pub async fn ingest_files(config: Config, path: Option<PathBuf>, quiet: bool) -> Result<()> {
    let mirror = Mirror::open(config)?;
    let dir = path.unwrap_or_else(|| mirror.config.pipeline.submissions_dir());
    if !dir.is_dir() {
        anyhow::bail!("Submissions directory not found: {}", dir.display());
    }

    let ingestor = BulkIngestor::new(mirror.source, mirror.store, mirror.config.pipeline)
        .with_quiet(quiet)
        .with_cancel(cancel_on_interrupt());
    ingestor
        .ingest_directory(&dir)
        .await
        .with_context(|| format!("Failed to ingest {}", dir.display()))?;
    Ok(())
}

pub async fn incremental(config: Config, days_back: Option<u32>, quiet: bool) -> Result<()> {
    if days_back == Some(0) {
        anyhow::bail!("--days-back must be positive");
    }

    let mirror = Mirror::open(config)?;
    let updater = IncrementalUpdater::new(mirror.source, mirror.store, mirror.config.pipeline).with_quiet(quiet);
    updater.run(days_back).await.context("Incremental update failed")?;
    Ok(())
}

pub async fn backfill(config: Config, start_year: i32, end_year: i32, forms: Vec<String>, quiet: bool) -> Result<()> {
    if start_year > end_year {
        anyhow::bail!("--start-year must not be after --end-year");
    }

    let mirror = Mirror::open(config)?;
    let forms = if forms.is_empty() {
        mirror.config.pipeline.backfill_forms.clone()
    } else {
        forms
    };

    let backfiller = Backfiller::new(mirror.source, mirror.store, &forms)
        .with_quiet(quiet)
        .with_cancel(cancel_on_interrupt());
    backfiller
        .run(start_year, end_year)
        .await
        .context("Backfill failed")?;
    Ok(())
}
