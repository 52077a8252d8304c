//! Query layer: search, listing, prefix lookup and resolution.
//!
//! Reads go straight to the [`MetadataStore`]. The blob tree is consulted
//! only by [`resolve`], to confirm that a record's content is actually
//! retrievable.
//!
//! The `run_*` functions render results for the CLI on stdout.

use std::path::PathBuf;

use filer_core::digest::{is_hex_prefix, Digest, InvalidDigest, DIGEST_HEX_LEN};
use filer_core::models::{ContentRecord, ContentState};
use filer_core::query::{ListOrder, RecordFilter};
use filer_core::store::MetadataStore;

use crate::error::{FilerError, Result};
use crate::storage::BlobStore;

/// Records with a tag containing `tag` and/or a location from `source`.
pub async fn search(
    store: &dyn MetadataStore,
    tag: Option<&str>,
    source: Option<&str>,
) -> Result<Vec<ContentRecord>> {
    let filter = RecordFilter {
        tag: tag.map(str::to_string),
        source: source.map(str::to_string),
    };
    Ok(store.scan(&filter, ListOrder::Imported, None).await?)
}

pub async fn list_all(
    store: &dyn MetadataStore,
    order: ListOrder,
    limit: Option<usize>,
) -> Result<Vec<ContentRecord>> {
    Ok(store.scan(&RecordFilter::default(), order, limit).await?)
}

/// Look up a record by full digest or unique hex prefix.
///
/// Input is case-insensitive. Anything that is not hex is rejected as
/// `InvalidDigest` before the store is touched.
pub async fn get_by_digest_or_prefix(store: &dyn MetadataStore, s: &str) -> Result<ContentRecord> {
    let needle = s.trim().to_ascii_lowercase();
    if !is_hex_prefix(&needle) {
        return Err(InvalidDigest(s.to_string()).into());
    }

    if needle.len() == DIGEST_HEX_LEN {
        let digest = Digest::parse(&needle)?;
        return store
            .get(&digest)
            .await?
            .ok_or(FilerError::DigestNotFound(needle));
    }

    let mut matches = store.find_by_prefix(&needle, 2).await?;
    match matches.len() {
        0 => Err(FilerError::DigestNotFound(needle)),
        1 => Ok(matches.remove(0)),
        _ => {
            // Report the real count, not the lookup limit.
            let total = store.find_by_prefix(&needle, usize::MAX).await?.len();
            Err(FilerError::AmbiguousPrefix {
                prefix: needle,
                matches: total,
            })
        }
    }
}

/// Storage path of the content for `s`, checked to exist on disk.
pub async fn resolve(store: &dyn MetadataStore, blobs: &BlobStore, s: &str) -> Result<PathBuf> {
    let record = get_by_digest_or_prefix(store, s).await?;
    resolve_record(blobs, &record).await
}

pub async fn resolve_record(blobs: &BlobStore, record: &ContentRecord) -> Result<PathBuf> {
    match record.state {
        ContentState::Stored => {}
        ContentState::Faulted => {
            return Err(FilerError::integrity(
                &record.digest,
                "content copy failed during ingestion",
            ))
        }
        ContentState::Pending => {
            return Err(FilerError::integrity(
                &record.digest,
                "content copy has not completed",
            ))
        }
    }

    let path = blobs.locate(&record.digest);
    if !blobs.contains(&record.digest).await? {
        return Err(FilerError::integrity(
            &record.digest,
            format!("stored content missing at {}", path.display()),
        ));
    }
    Ok(path)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_table(records: &[ContentRecord]) {
    if records.is_empty() {
        println!("No files.");
        return;
    }
    println!(
        "{:<16} {:>12} {:<20} {:>4}  {}",
        "DIGEST", "SIZE", "IMPORTED", "LOCS", "FIRST PATH"
    );
    for r in records {
        println!(
            "{:<16} {:>12} {:<20} {:>4}  {}",
            r.digest.short(16),
            r.size,
            r.imported_at.format("%Y-%m-%d %H:%M:%S"),
            r.locations.len(),
            r.first_path().unwrap_or("-")
        );
    }
}

/// `filer search`.
pub async fn run_search(
    store: &dyn MetadataStore,
    tag: Option<&str>,
    source: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let records = search(store, tag, source).await?;
    if json {
        return print_json(&records);
    }
    print_table(&records);
    Ok(())
}

/// `filer list`.
pub async fn run_list(
    store: &dyn MetadataStore,
    order: ListOrder,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let records = list_all(store, order, limit).await?;
    if json {
        return print_json(&records);
    }
    print_table(&records);
    Ok(())
}

/// `filer info`: the full record as JSON.
pub async fn run_info(store: &dyn MetadataStore, hash: &str) -> anyhow::Result<()> {
    let record = get_by_digest_or_prefix(store, hash).await?;
    print_json(&record)
}

/// `filer locate`: every path the content was seen at.
pub async fn run_locate(store: &dyn MetadataStore, hash: &str) -> anyhow::Result<()> {
    let record = get_by_digest_or_prefix(store, hash).await?;
    for loc in &record.locations {
        println!(
            "{}\t{}\t{}",
            loc.source,
            loc.path,
            loc.discovered_at.to_rfc3339()
        );
    }
    Ok(())
}

/// `filer resolve`: the stored content path.
pub async fn run_resolve(store: &dyn MetadataStore, blobs: &BlobStore, hash: &str) -> anyhow::Result<()> {
    let path = resolve(store, blobs, hash).await?;
    println!("{}", path.display());
    Ok(())
}
