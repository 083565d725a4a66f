//! Remote registry access configuration

use serde::{Deserialize, Serialize};

/// Environment variable consulted for the caller identification string
pub const USER_AGENT_ENV: &str = "FILING_MIRROR_USER_AGENT";

/// Connection settings for the remote filing registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Caller identification sent with every request ("Org Name contact@example.com")
    pub user_agent: String,
    /// Base URL for archive paths (daily feeds, index pages, documents)
    pub base_url: String,
    /// Base URL for the per-entity metadata endpoint
    pub data_base_url: String,
    /// Full URL of the bulk submissions archive
    pub bulk_archive_url: String,
    /// Maximum outbound requests per second across the whole process
    pub requests_per_second: u32,
    /// Request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Timeout for the bulk archive download (seconds)
    pub archive_timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Base of the exponential retry delay (seconds)
    pub retry_backoff_base_secs: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            base_url: "https://www.sec.gov".to_string(),
            data_base_url: "https://data.sec.gov".to_string(),
            bulk_archive_url: "https://www.sec.gov/Archives/edgar/daily-index/bulkdata/submissions.zip"
                .to_string(),
            requests_per_second: 10,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            archive_timeout_secs: 3600,
            max_retries: 2,
            retry_backoff_base_secs: 1.5,
        }
    }
}

impl RegistryConfig {
    /// Archive root under which daily feeds, index pages and documents live
    pub fn archives_url(&self) -> String {
        format!("{}/Archives/edgar", self.base_url.trim_end_matches('/'))
    }
}
