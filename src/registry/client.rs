//! HTTP implementation of the registry source

use super::rate_limit::{overload_backoff, RateLimiter};
use super::urls::RegistryUrls;
use super::{RegistryError, RegistrySource};
use crate::config::RegistryConfig;
use crate::types::{AccessionNumber, Cik};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Registry client over reqwest, gated by the shared rate limiter
pub struct HttpRegistry {
    http_client: reqwest::Client,
    /// Separate client with a long timeout for the bulk archive
    archive_client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    urls: RegistryUrls,
    max_retries: u32,
    retry_backoff_base: f64,
}

impl HttpRegistry {
    /// Build a client from configuration and the process-wide limiter
    pub fn new(config: &RegistryConfig, limiter: Arc<RateLimiter>) -> Result<Self, RegistryError> {
        let build = |timeout: Duration| {
            reqwest::Client::builder()
                .pool_idle_timeout(Duration::from_secs(90))
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .redirect(reqwest::redirect::Policy::limited(10))
                .user_agent(config.user_agent.as_str())
                .gzip(true)
                .brotli(true)
                .build()
        };

        Ok(Self {
            http_client: build(Duration::from_secs(config.request_timeout_secs))?,
            archive_client: build(Duration::from_secs(config.archive_timeout_secs))?,
            limiter,
            urls: RegistryUrls::new(config),
            max_retries: config.max_retries,
            retry_backoff_base: config.retry_backoff_base_secs,
        })
    }

    /// URL layout used by this client
    pub fn urls(&self) -> &RegistryUrls {
        &self.urls
    }

    /// Issue a GET, retrying transient failures with exponential backoff.
    ///
    /// 404 maps to [`RegistryError::NotFound`]; other client errors are
    /// returned immediately. 429 pushes the shared limiter back so every
    /// worker slows down, not just this one.
    async fn get(&self, client: &reqwest::Client, url: &str) -> Result<Response, RegistryError> {
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();
        let mut overloads = 0u32;

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retrying {} (attempt {}/{})", url, attempt + 1, attempts);
            }
            self.limiter.acquire().await;

            match client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(RegistryError::NotFound(url.to_string()));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        overloads += 1;
                        let retry_after = retry_after(&response);
                        self.limiter
                            .penalize(overload_backoff(overloads, retry_after))
                            .await;
                        last_error = format!("status {}", status.as_u16());
                        continue;
                    }
                    if !status.is_server_error() {
                        return Err(RegistryError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    last_error = format!("status {}", status.as_u16());
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                    last_error = e.to_string();
                }
                Err(e) => return Err(RegistryError::Http(e)),
            }

            if attempt + 1 < attempts {
                let delay = Duration::from_secs_f64(self.retry_backoff_base.powi(attempt as i32 + 1));
                warn!("Request to {} failed ({}), retrying in {:?}", url, last_error, delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(RegistryError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, RegistryError> {
        let response = self.get(&self.http_client, url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Stream a response body to `dest` through a temporary sibling file
    async fn download_to(&self, client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64, RegistryError> {
        let response = self.get(client, url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);
        let result = write_partial(response, &partial, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }
}

/// Stream `response` into `partial`, fsync it and move it over `dest`
async fn write_partial(response: Response, partial: &Path, dest: &Path) -> Result<u64, RegistryError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(partial, dest).await?;
    Ok(written)
}

#[async_trait]
impl RegistrySource for HttpRegistry {
    async fn download_bulk_archive(&self, dest: &Path) -> Result<u64, RegistryError> {
        let url = self.urls.bulk_archive().to_string();
        self.download_to(&self.archive_client, &url, dest).await
    }

    async fn fetch_daily_index(&self, date: NaiveDate) -> Result<Vec<u8>, RegistryError> {
        self.get_bytes(&self.urls.daily_index(date)).await
    }

    async fn fetch_quarterly_index(&self, year: i32, quarter: u32) -> Result<Vec<u8>, RegistryError> {
        self.get_bytes(&self.urls.quarterly_index(year, quarter)).await
    }

    async fn fetch_company_profile(&self, cik: &Cik) -> Result<Option<serde_json::Value>, RegistryError> {
        let url = self.urls.company_profile(cik);
        match self.get(&self.http_client, &url).await {
            Ok(response) => {
                let body = response.bytes().await?;
                serde_json::from_slice(&body)
                    .map(Some)
                    .map_err(|e| RegistryError::InvalidBody {
                        url,
                        reason: e.to_string(),
                    })
            }
            Err(RegistryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_filing_index(&self, cik: &Cik, accession: &AccessionNumber) -> Result<String, RegistryError> {
        let response = self
            .get(&self.http_client, &self.urls.filing_index(cik, accession))
            .await?;
        Ok(response.text().await?)
    }

    async fn download_document(&self, url: &str, dest: &Path) -> Result<u64, RegistryError> {
        self.download_to(&self.http_client, url, dest).await
    }
}

/// `Retry-After` header in seconds, if present
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Sibling path used while a download is in flight
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
