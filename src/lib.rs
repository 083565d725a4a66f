//! Filing Mirror: local mirror of a public regulatory filing registry
//!
//! Keeps a queryable copy of registrant entities and their filing history,
//! and retrieves the primary document of selected filings:
//! - Bulk snapshot ingestion from the registry's archive of per-entity records
//! - Incremental catch-up from daily change listings
//! - Historical backfill from quarterly listings
//! - Primary document resolution and bounded, rate-limited downloads
//! - One shared rate limiter in front of every outbound request

pub mod config;
pub mod ingest;
pub mod parsing;
pub mod progress;
pub mod registry;
pub mod retrieval;
pub mod store;
pub mod types;

pub use config::Config;
pub use types::*;
