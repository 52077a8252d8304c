//! Ingestion engine.
//!
//! Takes a candidate file and settles it against the store:
//!
//! ```text
//! Start ──▶ Hashed ──▶ get(digest) ─┬─ Known ───▶ append_location ─┬─▶ LocationAdded
//!                                   │                              └─▶ AlreadyRecorded
//!                                   └─ Unknown ─▶ insert_new ──┬─ Created ─▶ put ─▶ Created
//!                                                              └─ Conflict ─▶ (Known)
//! ```
//!
//! The metadata store's insert-if-absent is the only arbiter of "is this
//! digest new". A caller that loses the insert race converts its attempt into
//! a location append against the winner's record. A new record starts out
//! `pending` and is only marked `stored` once its content is in place; a
//! failed copy marks it `faulted` and the failure is reported, never hidden.
//!
//! Directory ingestion applies the same steps to every regular file under a
//! root, concurrently. Each file settles independently, so an aborted batch
//! leaves a valid store that is merely incomplete.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use walkdir::WalkDir;

use filer_core::digest::Digest;
use filer_core::models::{ContentRecord, ContentState, Provenance};
use filer_core::store::{AppendOutcome, InsertOutcome, MetadataStore};

use crate::config::{Config, IngestConfig};
use crate::error::{FilerError, Result};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sqlite_store::SqliteStore;
use crate::storage::{hash_file, BlobStore};

/// Upper bound on get/insert/append rounds for one file. Covers one lost
/// insert race followed by one retry after a vanished record.
const MAX_RESOLVE_ROUNDS: usize = 3;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**"];

/// Engine knobs, usually taken from `[ingest]`.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub path_tags: bool,
    pub follow_symlinks: bool,
    pub exclude_globs: Vec<String>,
    pub concurrency: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            path_tags: config.path_tags,
            follow_symlinks: config.follow_symlinks,
            exclude_globs: config.exclude_globs.clone(),
            concurrency: config.concurrency.max(1),
        }
    }
}

/// How one ingestion attempt ended.
#[derive(Debug)]
pub enum IngestStatus {
    /// New content: record inserted and bytes stored.
    Created,
    /// Known content seen at a new (path, source).
    LocationAdded,
    /// Known content already recorded at this (path, source).
    AlreadyRecorded,
    Failed(FilerError),
}

impl IngestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            IngestStatus::Created => "created",
            IngestStatus::LocationAdded => "location_added",
            IngestStatus::AlreadyRecorded => "already_recorded",
            IngestStatus::Failed(_) => "failed",
        }
    }
}

/// Result of [`Ingestor::ingest_file`].
#[derive(Debug)]
pub struct IngestOutcome {
    /// The path as recorded (absolute).
    pub path: PathBuf,
    pub status: IngestStatus,
    /// Known once hashing succeeded.
    pub digest: Option<Digest>,
    /// The record's provenance log after this ingestion.
    pub locations: Vec<Provenance>,
}

impl IngestOutcome {
    fn failed(path: PathBuf, digest: Option<Digest>, err: FilerError) -> Self {
        Self {
            path,
            status: IngestStatus::Failed(err),
            digest,
            locations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub path: PathBuf,
    pub reason: String,
}

/// Tally of a directory ingestion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub created: u64,
    pub location_added: u64,
    pub already_recorded: u64,
    pub failed: Vec<FailedItem>,
}

impl IngestSummary {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        match &outcome.status {
            IngestStatus::Created => self.created += 1,
            IngestStatus::LocationAdded => self.location_added += 1,
            IngestStatus::AlreadyRecorded => self.already_recorded += 1,
            IngestStatus::Failed(err) => self.failed.push(FailedItem {
                path: outcome.path.clone(),
                reason: err.to_string(),
            }),
        }
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn total(&self) -> u64 {
        self.created + self.location_added + self.already_recorded + self.failed_count()
    }
}

/// The ingestion engine. Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    options: Arc<IngestOptions>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn MetadataStore>, blobs: BlobStore, options: IngestOptions) -> Self {
        Self {
            store,
            blobs,
            options: Arc::new(options),
        }
    }

    /// Open the SQLite store and blob tree described by `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(config).await?;
        Ok(Self::new(
            Arc::new(store),
            BlobStore::from_config(&config.storage),
            IngestOptions::from(&config.ingest),
        ))
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Ingest a single file observed at `path` from `source`.
    ///
    /// Never returns an error: failures come back as
    /// [`IngestStatus::Failed`] so batch callers can tally them.
    pub async fn ingest_file(&self, path: &Path, source: &str, extra_tags: &[String]) -> IngestOutcome {
        let path = match absolute_normalized(path) {
            Ok(p) => p,
            Err(e) => return IngestOutcome::failed(path.to_path_buf(), None, FilerError::io(path, e)),
        };
        let span = info_span!("ingest", path = %path.display(), source = %source);
        self.ingest_absolute(path, source, extra_tags)
            .instrument(span)
            .await
    }

    async fn ingest_absolute(&self, path: PathBuf, source: &str, extra_tags: &[String]) -> IngestOutcome {
        if let Err(e) = check_regular_file(&path).await {
            return IngestOutcome::failed(path, None, e);
        }

        let (digest, size) = match hash_file(&path).await {
            Ok(hashed) => hashed,
            Err(e) => return IngestOutcome::failed(path, None, e),
        };
        debug!(digest = %digest.short(12), size, "hashed");

        match self.settle(&path, source, extra_tags, &digest, size).await {
            Ok((status, locations)) => {
                debug!(status = status.label(), locations = locations.len(), "settled");
                IngestOutcome {
                    path,
                    status,
                    digest: Some(digest),
                    locations,
                }
            }
            Err(e) => {
                warn!(digest = %digest.short(12), error = %e, "ingestion failed");
                IngestOutcome::failed(path, Some(digest), e)
            }
        }
    }

    /// Steps 3 onward: decide known/unknown and perform the matching update.
    async fn settle(
        &self,
        path: &Path,
        source: &str,
        extra_tags: &[String],
        digest: &Digest,
        size: u64,
    ) -> Result<(IngestStatus, Vec<Provenance>)> {
        let path_str = path.to_string_lossy().to_string();
        let mut tags = if self.options.path_tags {
            path_tags(path)
        } else {
            Vec::new()
        };
        tags.extend(extra_tags.iter().cloned());

        for round in 0..MAX_RESOLVE_ROUNDS {
            match self.store.get(digest).await? {
                Some(record) => {
                    if let Some(settled) = self
                        .add_location(&record, path, &path_str, source, &tags)
                        .await?
                    {
                        return Ok(settled);
                    }
                    warn!(round, "record disappeared during append; retrying");
                }
                None => {
                    let record = self
                        .new_record(path, &path_str, source, digest, size, &tags)
                        .await?;
                    match self.store.insert_new(&record).await? {
                        InsertOutcome::Created => return self.store_content(record, path).await,
                        InsertOutcome::Conflict => {
                            debug!(round, "lost insert race; appending location instead");
                        }
                    }
                }
            }
        }

        Err(FilerError::Store(anyhow!(
            "could not settle {} after {} attempts",
            digest,
            MAX_RESOLVE_ROUNDS
        )))
    }

    /// Known content: repair if needed, then append this observation.
    ///
    /// `Ok(None)` means the record vanished between read and append.
    async fn add_location(
        &self,
        record: &ContentRecord,
        path: &Path,
        path_str: &str,
        source: &str,
        tags: &[String],
    ) -> Result<Option<(IngestStatus, Vec<Provenance>)>> {
        if record.state != ContentState::Stored {
            self.repair(record, path).await?;
        }

        let status = if record.has_location(path_str, source) {
            IngestStatus::AlreadyRecorded
        } else {
            let provenance = Provenance::new(path_str, source);
            match self.store.append_location(&record.digest, &provenance).await? {
                AppendOutcome::Appended => IngestStatus::LocationAdded,
                AppendOutcome::AlreadyPresent => IngestStatus::AlreadyRecorded,
                AppendOutcome::NotFound => return Ok(None),
            }
        };

        self.store.merge_tags(&record.digest, tags).await?;

        let locations = self
            .store
            .get(&record.digest)
            .await?
            .map(|r| r.locations)
            .unwrap_or_else(|| record.locations.clone());
        Ok(Some((status, locations)))
    }

    /// Put content for a record that is not yet `stored`.
    ///
    /// A `pending` record may belong to a copy still in flight elsewhere;
    /// putting the same bytes again is harmless because `put` is idempotent.
    async fn repair(&self, record: &ContentRecord, path: &Path) -> Result<()> {
        self.blobs.put(&record.digest, path).await?;
        self.store.set_state(&record.digest, ContentState::Stored).await?;
        if record.state == ContentState::Faulted {
            info!(digest = %record.digest.short(12), "faulted content restored from new observation");
        } else {
            debug!(digest = %record.digest.short(12), previous_state = %record.state, "content confirmed");
        }
        Ok(())
    }

    async fn store_content(
        &self,
        record: ContentRecord,
        path: &Path,
    ) -> Result<(IngestStatus, Vec<Provenance>)> {
        match self.blobs.put(&record.digest, path).await {
            Ok(_) => {
                self.store
                    .set_state(&record.digest, ContentState::Stored)
                    .await?;
                info!(digest = %record.digest.short(12), size = record.size, "stored new content");
                Ok((IngestStatus::Created, record.locations))
            }
            Err(copy_err) => {
                error!(
                    digest = %record.digest,
                    error = %copy_err,
                    "content copy failed after record insert; marking record faulted"
                );
                // Only a still-pending record is downgraded: a concurrent
                // observation may already have stored the content.
                match self
                    .store
                    .transition_state(&record.digest, ContentState::Pending, ContentState::Faulted)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(digest = %record.digest.short(12), "record no longer pending; state left as is");
                    }
                    Err(mark_err) => {
                        error!(digest = %record.digest, error = %mark_err, "could not mark record faulted");
                    }
                }
                Err(FilerError::integrity(
                    &record.digest,
                    format!("record inserted but content copy failed: {}", copy_err),
                ))
            }
        }
    }

    async fn new_record(
        &self,
        path: &Path,
        path_str: &str,
        source: &str,
        digest: &Digest,
        size: u64,
        tags: &[String],
    ) -> Result<ContentRecord> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| FilerError::io(path, e))?;

        Ok(ContentRecord {
            digest: digest.clone(),
            size,
            mime_type: mime_guess::from_path(path)
                .first()
                .map(|m| m.essence_str().to_string()),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .filter(|e| !e.is_empty()),
            original_filename: path.file_name().map(|n| n.to_string_lossy().to_string()),
            created_at: meta.created().ok().and_then(whole_seconds),
            modified_at: meta.modified().ok().and_then(whole_seconds),
            imported_at: now_seconds(),
            storage_path: self.blobs.locate(digest),
            state: ContentState::Pending,
            locations: vec![Provenance::new(path_str, source)],
            tags: tags.iter().cloned().collect::<BTreeSet<_>>(),
            metadata: serde_json::Map::new(),
        })
    }

    /// Ingest every regular file under `root`.
    ///
    /// If `root` is itself a file it is ingested as a batch of one. Walk
    /// errors and per-file failures are tallied, never propagated.
    pub async fn ingest_directory(
        &self,
        root: &Path,
        source: &str,
        recursive: bool,
        extra_tags: &[String],
        progress: &dyn IngestProgressReporter,
    ) -> Result<IngestSummary> {
        let root = absolute_normalized(root).map_err(|e| FilerError::io(root, e))?;
        if !tokio::fs::try_exists(&root)
            .await
            .map_err(|e| FilerError::io(&root, e))?
        {
            return Err(FilerError::NotFound(root));
        }

        let root_label = root.display().to_string();
        progress.report(IngestProgressEvent::Discovering {
            root: root_label.clone(),
        });

        let excludes = build_globset(&self.options.exclude_globs)?;
        let skip_root = absolute_normalized(self.blobs.root()).ok();
        let follow = self.options.follow_symlinks;
        let walk_root = root.clone();
        let (files, walk_failures) = tokio::task::spawn_blocking(move || {
            discover(&walk_root, recursive, follow, &excludes, skip_root.as_deref())
        })
        .await
        .map_err(|e| FilerError::Store(anyhow!("directory walk panicked: {}", e)))?;

        let total = files.len() as u64;
        info!(root = %root_label, files = total, "discovered files");

        let mut summary = IngestSummary {
            failed: walk_failures,
            ..Default::default()
        };
        let mut resolved = 0u64;
        let mut set: JoinSet<IngestOutcome> = JoinSet::new();
        let mut pending = files.into_iter();

        loop {
            while set.len() < self.options.concurrency {
                let Some(file) = pending.next() else { break };
                let this = self.clone();
                let source = source.to_string();
                let tags = extra_tags.to_vec();
                set.spawn(async move { this.ingest_file(&file, &source, &tags).await });
            }

            let Some(joined) = set.join_next().await else { break };
            match joined {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => summary.failed.push(FailedItem {
                    path: root.clone(),
                    reason: format!("ingestion task aborted: {}", e),
                }),
            }
            resolved += 1;
            progress.report(IngestProgressEvent::Ingesting {
                root: root_label.clone(),
                n: resolved,
                total,
                created: summary.created,
                location_added: summary.location_added,
                already_recorded: summary.already_recorded,
                failed: summary.failed_count(),
            });
        }

        info!(
            root = %root_label,
            created = summary.created,
            location_added = summary.location_added,
            already_recorded = summary.already_recorded,
            failed = summary.failed_count(),
            "directory ingestion finished"
        );
        Ok(summary)
    }
}

async fn check_regular_file(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(FilerError::NotAFile(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FilerError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(FilerError::io(path, e)),
    }
}

/// Make `path` absolute and drop `.` and `..` components lexically.
///
/// Symlinks are not resolved, so the result is the path as observed, with
/// `/x/a/../b/f` and `/x/b/f` naming the same location.
fn absolute_normalized(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = out.components().next_back() {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Directory components of `path`, excluding the file name and any root,
/// `.` or `..` components.
pub fn path_tags(path: &Path) -> Vec<String> {
    let Some(parent) = path.parent() else {
        return Vec::new();
    };
    parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect()
}

fn whole_seconds(t: std::time::SystemTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(DateTime::<Utc>::from(t).timestamp(), 0)
}

fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in DEFAULT_EXCLUDES
        .iter()
        .copied()
        .chain(patterns.iter().map(String::as_str))
    {
        let glob = Glob::new(pattern)
            .map_err(|e| FilerError::Store(anyhow!("invalid exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| FilerError::Store(anyhow!("invalid exclude globs: {}", e)))
}

/// Walk `root` and collect regular files, skipping excluded paths and the
/// store's own blob tree.
fn discover(
    root: &Path,
    recursive: bool,
    follow_symlinks: bool,
    excludes: &GlobSet,
    skip: Option<&Path>,
) -> (Vec<PathBuf>, Vec<FailedItem>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();

    let mut walker = WalkDir::new(root).follow_links(follow_symlinks);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut entries = walker.into_iter();
    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push(FailedItem {
                    path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(skip) = skip {
            if entry.path().starts_with(skip) {
                if entry.file_type().is_dir() {
                    entries.skip_current_dir();
                }
                continue;
            }
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if excludes.is_match(relative) {
            continue;
        }
        files.push(entry.into_path());
    }

    files.sort();
    (files, failures)
}
