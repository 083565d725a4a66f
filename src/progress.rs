//! Progress tracking and run statistics shared by all pipelines

use crate::store::InsertOutcome;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Stop request shared between a run and whoever may interrupt it
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Aggregate outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Units examined (files, feeds, entities or documents)
    pub processed: usize,
    /// Units that completed
    pub succeeded: usize,
    /// Units intentionally not handled (already present, excluded, missing)
    pub skipped: usize,
    /// Units that failed and were logged
    pub failed: usize,
    /// Entity records written
    pub companies_upserted: usize,
    /// New filing rows
    pub filings_inserted: usize,
    /// Filing rows that were already mirrored
    pub filings_already_present: usize,
    /// Metadata endpoint lookups issued
    pub profile_lookups: usize,
    /// Processing time in seconds
    pub elapsed_seconds: f64,
    /// Units per second
    pub units_per_second: f64,
}

impl RunStats {
    /// Calculate units per second
    pub fn update_rate(&mut self) {
        if self.elapsed_seconds > 0.0 {
            self.units_per_second = self.processed as f64 / self.elapsed_seconds;
        }
    }
}

/// Progress tracker for a pipeline run
pub struct RunProgress {
    /// Label used in the summary
    label: String,
    /// Progress bar (None if running in quiet mode)
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    companies_upserted: AtomicUsize,
    filings_inserted: AtomicUsize,
    filings_already_present: AtomicUsize,
    profile_lookups: AtomicUsize,
    cancel: CancelToken,
}

impl RunProgress {
    /// Create a new progress tracker
    pub fn new(label: impl Into<String>, total_expected: Option<u64>, quiet: bool) -> Self {
        let progress_bar = if !quiet {
            let pb = match total_expected {
                Some(total) => ProgressBar::new(total),
                None => ProgressBar::new_spinner(),
            };

            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );

            Some(pb)
        } else {
            None
        };

        Self {
            label: label.into(),
            progress_bar,
            start_time: Instant::now(),
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            companies_upserted: AtomicUsize::new(0),
            filings_inserted: AtomicUsize::new(0),
            filings_already_present: AtomicUsize::new(0),
            profile_lookups: AtomicUsize::new(0),
            cancel: CancelToken::new(),
        }
    }

    /// Observe an externally owned token instead of a private one
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the expected number of units once it is known
    pub fn set_total(&self, total: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_length(total);
        }
    }

    fn tick(&self, name: &str) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(ref pb) = self.progress_bar {
            pb.set_position(processed as u64);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            };

            // Truncated safely for UTF-8
            let display_name = if name.chars().count() > 30 {
                let truncated: String = name.chars().take(27).collect();
                format!("{}...", truncated)
            } else {
                name.to_string()
            };

            pb.set_message(format!("{:.1}/s | {}", rate, display_name));
        }
    }

    /// Record a unit that completed
    pub fn unit_succeeded(&self, name: &str) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.tick(name);
    }

    /// Record a unit that was intentionally not handled
    pub fn unit_skipped(&self, name: &str) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.tick(name);
    }

    /// Record a unit that failed
    pub fn unit_failed(&self, name: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.tick(name);
    }

    pub fn companies_written(&self, count: usize) {
        self.companies_upserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn filings_written(&self, outcome: InsertOutcome) {
        self.filings_inserted.fetch_add(outcome.inserted, Ordering::Relaxed);
        self.filings_already_present
            .fetch_add(outcome.already_present, Ordering::Relaxed);
    }

    pub fn lookup_issued(&self) {
        self.profile_lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics
    pub fn get_stats(&self) -> RunStats {
        let mut stats = RunStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            companies_upserted: self.companies_upserted.load(Ordering::Relaxed),
            filings_inserted: self.filings_inserted.load(Ordering::Relaxed),
            filings_already_present: self.filings_already_present.load(Ordering::Relaxed),
            profile_lookups: self.profile_lookups.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
            units_per_second: 0.0,
        };
        stats.update_rate();
        stats
    }

    /// Check if the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the run between units
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(ref pb) = self.progress_bar {
            pb.abandon_with_message("Cancelled");
        }
    }

    /// Finish the progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            let stats = self.get_stats();
            pb.finish_with_message(format!(
                "Done! {} ok, {} skipped, {} failed, {:.1}/s",
                stats.succeeded, stats.skipped, stats.failed, stats.units_per_second
            ));
        }
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        print_summary(&self.label, &self.get_stats());
    }
}

/// Print a run summary to the console
pub fn print_summary(label: &str, stats: &RunStats) {
    let title = format!("{} Summary", label);
    println!("\n{}", title);
    println!("{}", "=".repeat(title.len()));
    println!("Processed:           {}", stats.processed);
    println!("Succeeded:           {}", stats.succeeded);
    println!("Skipped:             {}", stats.skipped);
    println!("Failed:              {}", stats.failed);
    println!("Companies upserted:  {}", stats.companies_upserted);
    println!("Filings inserted:    {}", stats.filings_inserted);
    println!("Already present:     {}", stats.filings_already_present);
    println!("Profile lookups:     {}", stats.profile_lookups);
    println!("Elapsed time:        {:.1}s", stats.elapsed_seconds);
    println!("Processing rate:     {:.1}/s", stats.units_per_second);
}
