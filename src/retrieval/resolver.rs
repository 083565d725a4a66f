//! Primary document resolution from filing index pages

use crate::config::FilterConfig;
use crate::parsing::filing_index::{has_excluded_exhibit, primary_document};
use crate::parsing::parse_filing_index;
use crate::registry::{RegistrySource, RegistryUrls};
use crate::types::FilingRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the resolved filename came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    /// Primary rich-format document listed on the index page
    IndexPage,
    /// Filename recorded when the filing was ingested
    StoredFallback,
}

/// A filing together with the document that should be downloaded for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub record: FilingRecord,
    pub filename: String,
    pub url: String,
    pub source: DocumentSource,
    /// The index page lists an exhibit of an excluded category
    pub excluded: bool,
}

/// Resolves the primary document of a filing
pub struct FilingResolver {
    source: Arc<dyn RegistrySource>,
    urls: RegistryUrls,
    target_forms: Vec<String>,
    excluded_prefixes: Vec<String>,
}

impl FilingResolver {
    pub fn new(
        source: Arc<dyn RegistrySource>,
        urls: RegistryUrls,
        target_forms: &[String],
        filter: &FilterConfig,
    ) -> Self {
        Self {
            source,
            urls,
            target_forms: target_forms.iter().map(|f| f.trim().to_uppercase()).collect(),
            excluded_prefixes: filter
                .excluded_exhibit_prefixes
                .iter()
                .map(|p| p.trim().to_uppercase())
                .collect(),
        }
    }

    /// Resolve one filing. Never fails: an unreachable or unusable index
    /// page falls back to the stored filename.
    pub async fn resolve(&self, record: &FilingRecord) -> ResolvedDocument {
        let filing = &record.filing;
        let fallback = |excluded: bool| ResolvedDocument {
            record: record.clone(),
            filename: filing.filename.clone(),
            url: self
                .urls
                .document(&filing.cik, &filing.accession_number, &filing.filename),
            source: DocumentSource::StoredFallback,
            excluded,
        };

        let html = match self
            .source
            .fetch_filing_index(&filing.cik, &filing.accession_number)
            .await
        {
            Ok(html) => html,
            Err(e) => {
                warn!(
                    "Index page unavailable for {} (CIK {}): {}",
                    filing.accession_number, filing.cik, e
                );
                return fallback(false);
            }
        };

        let documents = match parse_filing_index(&html) {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Unusable index page for {}: {}", filing.accession_number, e);
                return fallback(false);
            }
        };

        let excluded = has_excluded_exhibit(&documents, &self.excluded_prefixes);
        if excluded {
            debug!("{} lists an excluded exhibit", filing.accession_number);
        }

        match primary_document(&documents, &self.target_forms) {
            Some(doc) => ResolvedDocument {
                record: record.clone(),
                filename: doc.filename.clone(),
                url: self
                    .urls
                    .document(&filing.cik, &filing.accession_number, &doc.filename),
                source: DocumentSource::IndexPage,
                excluded,
            },
            None => {
                debug!(
                    "No rich-format primary document for {}, using {}",
                    filing.accession_number, filing.filename
                );
                fallback(excluded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::registry::RegistryError;
    use crate::types::{AccessionNumber, Cik, Filing};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::path::Path;

    struct IndexPages(HashMap<String, String>);

    #[async_trait]
    impl RegistrySource for IndexPages {
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
            self.0
                .get(acc.as_str())
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(acc.to_string()))
        }
        async fn download_document(&self, _url: &str, _dest: &Path) -> Result<u64, RegistryError> {
            Err(RegistryError::NotFound("document".into()))
        }
    }

    fn page(rows: &[(&str, &str)]) -> String {
        let mut html = String::from(
            r#"<html><body><table class="tableFile" summary="Document Format Files">
<tr><th>Seq</th><th>Description</th><th>Document</th><th>Type</th><th>Size</th></tr>"#,
        );
        for (i, (name, doc_type)) in rows.iter().enumerate() {
            html.push_str(&format!(
                r#"<tr><td>{}</td><td>doc</td><td><a href="/x/{name}">{name}</a></td><td>{doc_type}</td><td>100</td></tr>"#,
                i + 1
            ));
        }
        html.push_str("</table></body></html>");
        html
    }

    fn record(accession: &str) -> FilingRecord {
        FilingRecord {
            id: 1,
            filing: Filing {
                cik: Cik::parse("320193").unwrap(),
                form_type: "10-K".into(),
                filing_date: NaiveDate::from_ymd_opt(2023, 11, 3).unwrap(),
                accession_number: AccessionNumber::parse(accession).unwrap(),
                filename: format!("{}.txt", accession),
            },
            company_name: "Apple Inc.".into(),
            sic: Some("3571".into()),
        }
    }

    fn resolver(pages: HashMap<String, String>) -> FilingResolver {
        FilingResolver::new(
            Arc::new(IndexPages(pages)),
            RegistryUrls::new(&RegistryConfig::default()),
            &["10-K".to_string()],
            &FilterConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_resolves_primary_html_document() {
        let acc = "0000320193-23-000106";
        let mut pages = HashMap::new();
        pages.insert(
            acc.to_string(),
            page(&[("aapl-20230930.htm", "10-K"), ("ex21.htm", "EX-21.1")]),
        );

        let resolved = resolver(pages).resolve(&record(acc)).await;
        assert_eq!(resolved.source, DocumentSource::IndexPage);
        assert_eq!(resolved.filename, "aapl-20230930.htm");
        assert_eq!(
            resolved.url,
            "https://www.sec.gov/Archives/edgar/data/320193/000032019323000106/aapl-20230930.htm"
        );
        assert!(!resolved.excluded);
    }

    #[tokio::test]
    async fn test_excluded_exhibit_flags_filing() {
        let acc = "0000320193-23-000107";
        let mut pages = HashMap::new();
        pages.insert(
            acc.to_string(),
            page(&[("trust-10k.htm", "10-K"), ("ex34.htm", "EX-34.1")]),
        );

        let resolved = resolver(pages).resolve(&record(acc)).await;
        assert!(resolved.excluded);
        assert_eq!(resolved.filename, "trust-10k.htm");
    }

    #[tokio::test]
    async fn test_falls_back_without_rich_document() {
        let acc = "0000320193-23-000108";
        let mut pages = HashMap::new();
        pages.insert(acc.to_string(), page(&[("report.txt", "10-K")]));

        let resolved = resolver(pages).resolve(&record(acc)).await;
        assert_eq!(resolved.source, DocumentSource::StoredFallback);
        assert_eq!(resolved.filename, "0000320193-23-000108.txt");
    }

    #[tokio::test]
    async fn test_falls_back_when_page_unreachable() {
        let resolved = resolver(HashMap::new())
            .resolve(&record("0000320193-23-000109"))
            .await;
        assert_eq!(resolved.source, DocumentSource::StoredFallback);
        assert!(!resolved.excluded);
        assert!(resolved.url.ends_with("/000032019323000109/0000320193-23-000109.txt"));
    }
}
