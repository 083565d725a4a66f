use super::open_store;
use anyhow::Result;
use filing_mirror::{config::Config, store::MirrorStore};
use serde_json::json;

pub fn show_stats(config: Config, format: &str) -> Result<()> {
    let store = open_store(&config)?;
    let counts = store.counts()?;
    let document_dir = config.pipeline.document_dir();
    let documents = std::fs::read_dir(&document_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0);

    match format {
        "json" => {
            let stats = json!({
                "data_dir": config.pipeline.data_dir,
                "companies": counts.companies,
                "filings": counts.filings,
                "documents": documents,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => {
            println!("\nFiling Mirror Statistics:");
            println!("=========================");
            println!("Data directory: {}", config.pipeline.data_dir.display());
            println!("Entities: {}", counts.companies);
            println!("Filings: {}", counts.filings);
            println!("Downloaded documents: {}", documents);
        }
    }

    Ok(())
}
