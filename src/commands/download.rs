use super::Mirror;
use anyhow::{Context, Result};
use filing_mirror::{
    config::Config,
    retrieval::{build_snapshot, snapshot_file_name, write_snapshot, DocumentFetcher, FilingResolver},
    store::FilingQuery,
};
use tracing::{info, warn};

/// Options of the `download` subcommand
pub struct DownloadArgs {
    pub start_year: i32,
    pub end_year: i32,
    pub forms: Vec<String>,
    pub limit: Option<usize>,
    pub max_downloads: Option<usize>,
    pub concurrency: Option<usize>,
    pub overwrite: bool,
}

pub async fn download_documents(config: Config, args: DownloadArgs, quiet: bool) -> Result<()> {
    if args.start_year > args.end_year {
        anyhow::bail!("--start-year must not be after --end-year");
    }
    if args.concurrency == Some(0) {
        anyhow::bail!("--concurrency must be positive");
    }

    let mirror = Mirror::open(config)?;
    let pipeline = &mirror.config.pipeline;
    let forms = if args.forms.is_empty() {
        pipeline.target_forms.clone()
    } else {
        args.forms
    };

    let query = FilingQuery::for_years(args.start_year, args.end_year, &forms, &mirror.config.filter)
        .context("Year range is out of bounds")?
        .with_limit(args.limit);

    let resolver = FilingResolver::new(
        mirror.source.clone(),
        mirror.urls.clone(),
        &forms,
        &mirror.config.filter,
    );
    let mut fetcher = DocumentFetcher::new(mirror.source.clone(), mirror.store.clone(), resolver, pipeline)
        .with_quiet(quiet)
        .with_skip_existing(pipeline.skip_existing && !args.overwrite);
    if let Some(concurrency) = args.concurrency {
        fetcher = fetcher.with_download_concurrency(concurrency);
    }

    let report = fetcher
        .run(&query, args.max_downloads)
        .await
        .context("Document download failed")?;

    let snapshot = build_snapshot(&report.outcomes);
    let name = snapshot_file_name(&forms, args.start_year, args.end_year);
    let path = write_snapshot(&pipeline.data_dir, &name, &snapshot)?;
    info!(
        "Wrote metadata for {} filings of {} entities to {}",
        report.outcomes.len(),
        snapshot.len(),
        path.display()
    );

    let failed = report.failed();
    if failed > 0 {
        warn!("{} downloads failed", failed);
        anyhow::bail!("{} of {} downloads failed", failed, report.outcomes.len());
    }
    Ok(())
}
