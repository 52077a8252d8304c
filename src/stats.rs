//! Store statistics and health overview.
//!
//! Provides a quick summary of what's stored: unique content count, total
//! bytes, how many provenance entries point at it, and per-source and
//! per-tag breakdowns. Used by `filer stats` and the viewer's `/api/stats`.

use anyhow::Result;
use serde::Serialize;

use filer_core::query::StoreStats;
use filer_core::store::MetadataStore;

use crate::config::Config;

/// Aggregate statistics over the whole store.
pub async fn collect(store: &dyn MetadataStore) -> Result<StoreStats> {
    store.stats().await
}

#[derive(Serialize)]
struct StatsReport<'a> {
    database: String,
    database_size: u64,
    storage_root: String,
    #[serde(flatten)]
    stats: &'a StoreStats,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, store: &dyn MetadataStore, json: bool) -> Result<()> {
    let stats = collect(store).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    if json {
        let report = StatsReport {
            database: config.db.path.display().to_string(),
            database_size: db_size,
            storage_root: config.storage.root.display().to_string(),
            stats: &stats,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("filer: Store Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Storage:     {}", config.storage.root.display());
    println!();
    println!("  Unique files: {}", stats.unique_count);
    println!("  Total size:   {}", format_bytes(stats.total_size));
    println!("  Locations:    {}", stats.total_locations);
    if stats.unique_count > 0 {
        println!(
            "  Dedup ratio:  {:.2} locations per file",
            stats.total_locations as f64 / stats.unique_count as f64
        );
    }

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<24} {:>10}", "SOURCE", "LOCATIONS");
        println!("  {}", "-".repeat(36));

        let mut sources: Vec<_> = stats.by_source.iter().collect();
        sources.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (source, count) in sources {
            println!("  {:<24} {:>10}", source, count);
        }
    }

    if !stats.top_tags.is_empty() {
        println!();
        println!("  Top tags:");
        for (tag, count) in &stats.top_tags {
            println!("  {:<24} {:>10}", tag, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
