//! Subcommand handlers

pub mod download;
pub mod ingest;
pub mod init;
pub mod stats;

use anyhow::{Context, Result};
use filing_mirror::{
    config::Config,
    progress::CancelToken,
    registry::{HttpRegistry, RateLimiter, RegistrySource, RegistryUrls},
    store::{MirrorStore, SledMirror},
};
use std::sync::Arc;
use tracing::warn;

/// Shared handles for one command: the rate-limited registry client and the
/// opened mirror store
pub struct Mirror {
    pub config: Config,
    pub source: Arc<dyn RegistrySource>,
    pub urls: RegistryUrls,
    pub store: Arc<dyn MirrorStore>,
}

impl Mirror {
    pub fn open(config: Config) -> Result<Self> {
        // One limiter for the whole process
        let limiter = Arc::new(RateLimiter::new(config.registry.requests_per_second));
        let registry = HttpRegistry::new(&config.registry, limiter).context("Failed to build HTTP client")?;
        let urls = registry.urls().clone();
        let store = open_store(&config)?;

        Ok(Self {
            config,
            source: Arc::new(registry),
            urls,
            store,
        })
    }
}

pub fn open_store(config: &Config) -> Result<Arc<dyn MirrorStore>> {
    let store = SledMirror::open(&config.pipeline.data_dir).with_context(|| {
        format!(
            "Failed to open mirror store in {}",
            config.pipeline.data_dir.display()
        )
    })?;
    Ok(Arc::new(store))
}

/// Token cancelled by the first Ctrl-C so long runs stop between units and
/// keep what they already wrote. A second Ctrl-C exits immediately.
pub fn cancel_on_interrupt() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, stopping after the current unit (Ctrl-C again to abort)");
        token.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    cancel
}
