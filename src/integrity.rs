//! Store audit.
//!
//! Cross-checks the metadata store against the blob tree and reports every
//! disagreement. It never repairs anything; what to do about a fault is up
//! to the operator.
//!
//! | Finding | Meaning | Fault |
//! |---------|---------|-------|
//! | `missing` | record is `stored` but its blob is gone | yes |
//! | `pending` | record whose copy never confirmed | yes |
//! | `faulted` | record whose copy failed | yes |
//! | `corrupt` | blob no longer hashes to its digest (`deep` only) | yes |
//! | `orphans` | blob or stray file with no record | no |
//! | `stray_temp` | leftover temp file from an interrupted copy | no |

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use filer_core::digest::Digest;
use filer_core::layout::digest_from_file_name;
use filer_core::models::ContentState;
use filer_core::store::MetadataStore;

use crate::error::FilerError;
use crate::storage::{BlobStore, TEMP_SUFFIX};

#[derive(Debug, Default, Serialize)]
pub struct AuditReport {
    pub records_checked: u64,
    pub blobs_scanned: u64,
    pub missing: Vec<Digest>,
    pub pending: Vec<Digest>,
    pub faulted: Vec<Digest>,
    pub corrupt: Vec<Digest>,
    pub orphans: Vec<PathBuf>,
    pub stray_temp: Vec<PathBuf>,
}

impl AuditReport {
    pub fn fault_count(&self) -> usize {
        self.missing.len() + self.pending.len() + self.faulted.len() + self.corrupt.len()
    }

    pub fn is_clean(&self) -> bool {
        self.fault_count() == 0
    }
}

/// Audit every record and every file under the blob root.
///
/// With `deep`, each present blob is re-hashed as well.
pub async fn audit(store: &dyn MetadataStore, blobs: &BlobStore, deep: bool) -> Result<AuditReport> {
    let mut report = AuditReport::default();
    let digests = store.all_digests().await?;
    let known: HashSet<Digest> = digests.iter().cloned().collect();

    for digest in digests {
        let Some(record) = store.get(&digest).await? else {
            continue;
        };
        report.records_checked += 1;

        match record.state {
            ContentState::Pending => report.pending.push(digest.clone()),
            ContentState::Faulted => report.faulted.push(digest.clone()),
            ContentState::Stored => {}
        }

        if !blobs.contains(&digest).await? {
            if record.state == ContentState::Stored {
                warn!(digest = %digest, "stored content is missing");
                report.missing.push(digest);
            }
            continue;
        }

        if deep {
            match blobs.verify(&digest).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(digest = %digest, "stored content does not match its digest");
                    report.corrupt.push(digest);
                }
                Err(FilerError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    report.missing.push(digest);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let root = blobs.root().to_path_buf();
    let scanned = tokio::task::spawn_blocking(move || scan_tree(&root))
        .await
        .map_err(|e| anyhow!("blob scan panicked: {}", e))??;

    report.blobs_scanned = scanned.blobs.len() as u64;
    report.stray_temp = scanned.temps;
    report.orphans = scanned.unrecognized;
    for (digest, path) in scanned.blobs {
        if !known.contains(&digest) {
            report.orphans.push(path);
        }
    }
    report.orphans.sort();

    info!(
        records = report.records_checked,
        blobs = report.blobs_scanned,
        faults = report.fault_count(),
        orphans = report.orphans.len(),
        "audit finished"
    );
    Ok(report)
}

#[derive(Default)]
struct TreeScan {
    blobs: Vec<(Digest, PathBuf)>,
    temps: Vec<PathBuf>,
    unrecognized: Vec<PathBuf>,
}

fn scan_tree(root: &Path) -> Result<TreeScan> {
    let mut scan = TreeScan::default();
    if !root.exists() {
        return Ok(scan);
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
            scan.temps.push(entry.into_path());
            continue;
        }
        match digest_from_file_name(&name) {
            Some(digest) if blob_in_place(root, &digest, entry.path()) => {
                scan.blobs.push((digest, entry.into_path()))
            }
            _ => scan.unrecognized.push(entry.into_path()),
        }
    }
    Ok(scan)
}

/// A blob only counts if it sits at its canonical shard path.
fn blob_in_place(root: &Path, digest: &Digest, path: &Path) -> bool {
    filer_core::layout::shard_path(root, digest) == path
}

/// Run the verify command: audit, print findings, fail on faults.
pub async fn run_verify(
    store: &dyn MetadataStore,
    blobs: &BlobStore,
    deep: bool,
    json: bool,
) -> Result<()> {
    let report = audit(store, blobs, deep).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Checked {} records and {} blobs{}",
            report.records_checked,
            report.blobs_scanned,
            if deep { " (deep)" } else { "" }
        );
        print_digests("missing content", &report.missing);
        print_digests("pending copy", &report.pending);
        print_digests("faulted copy", &report.faulted);
        print_digests("corrupt content", &report.corrupt);
        print_paths("orphan files", &report.orphans);
        print_paths("stray temp files", &report.stray_temp);
        if report.is_clean() {
            println!("OK");
        }
    }

    if !report.is_clean() {
        anyhow::bail!("{} integrity fault(s) found", report.fault_count());
    }
    Ok(())
}

fn print_digests(label: &str, digests: &[Digest]) {
    if digests.is_empty() {
        return;
    }
    println!("{} ({}):", label, digests.len());
    for d in digests {
        println!("  {}", d);
    }
}

fn print_paths(label: &str, paths: &[PathBuf]) {
    if paths.is_empty() {
        return;
    }
    println!("{} ({}):", label, paths.len());
    for p in paths {
        println!("  {}", p.display());
    }
}
