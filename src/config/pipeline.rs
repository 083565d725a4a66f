//! Ingestion pipeline and document retrieval configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings shared by the bulk, incremental and download stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for the mirror store, extracted archives and documents
    pub data_dir: PathBuf,
    /// Worker count for CPU-bound parsing
    pub bulk_workers: usize,
    /// Number of entity files handled per chunk during bulk ingestion
    pub file_chunk_size: usize,
    /// Number of daily feeds to look back during incremental runs
    pub incremental_days: u32,
    /// Concurrent metadata lookups and index page fetches
    pub network_concurrency: usize,
    /// Concurrent document downloads
    pub download_concurrency: usize,
    /// Subdirectory of `data_dir` that receives downloaded documents
    pub document_subdir: String,
    /// Form types selected by the download stage
    pub target_forms: Vec<String>,
    /// Form types kept during historical backfill (empty keeps everything)
    pub backfill_forms: Vec<String>,
    /// Skip documents that already exist on disk
    pub skip_existing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: directories::ProjectDirs::from("", "", "filing-mirror")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".filing-mirror")),
            bulk_workers: default_bulk_workers(),
            file_chunk_size: 50_000,
            incremental_days: 5,
            network_concurrency: 10,
            download_concurrency: 10,
            document_subdir: "documents".to_string(),
            target_forms: vec!["10-K".to_string()],
            backfill_forms: vec!["10-K".to_string(), "10-K/A".to_string()],
            skip_existing: true,
        }
    }
}

impl PipelineConfig {
    /// Directory holding the extracted per-entity records
    pub fn submissions_dir(&self) -> PathBuf {
        self.data_dir.join("submissions")
    }

    /// Local path of the downloaded bulk archive
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join("submissions.zip")
    }

    /// Directory receiving downloaded documents
    pub fn document_dir(&self) -> PathBuf {
        self.data_dir.join(&self.document_subdir)
    }
}

/// One fewer than the available cores, never below one
pub fn default_bulk_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Category exclusion settings used by the query stage and the resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Industry codes of non-operating vehicles excluded from downloads
    pub excluded_sic_codes: Vec<String>,
    /// Exhibit type prefixes marking a filing as excluded category
    pub excluded_exhibit_prefixes: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            excluded_sic_codes: vec!["6189".to_string(), "6722".to_string(), "6726".to_string()],
            excluded_exhibit_prefixes: ["EX-33", "EX-34", "EX-35", "EX-1122", "EX-1123"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
