//! Metadata store abstraction.
//!
//! The [`MetadataStore`] trait is the catalog of one [`ContentRecord`] per
//! digest. It is the single source of truth for whether a digest exists:
//! the blob tree on disk is never consulted for that decision.
//!
//! Implementations must be `Send + Sync` and every mutating method must be
//! atomic on its own. In particular:
//!
//! - [`insert_new`](MetadataStore::insert_new) is insert-if-absent. When two
//!   callers race to insert the same digest exactly one sees
//!   [`InsertOutcome::Created`]; the other sees [`InsertOutcome::Conflict`].
//! - [`append_location`](MetadataStore::append_location) checks for an
//!   existing `(path, source)` and appends in one step, so two identical
//!   concurrent appends leave one entry.
//! - [`transition_state`](MetadataStore::transition_state) compares and sets
//!   in one step, so a failed copy can downgrade `pending` to `faulted`
//!   without clobbering a concurrent `stored`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::digest::Digest;
use crate::models::{ContentRecord, ContentState, Provenance};
use crate::query::{ListOrder, RecordFilter, StoreStats};

/// Result of [`MetadataStore::insert_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// A record for this digest already exists.
    Conflict,
}

/// Result of [`MetadataStore::append_location`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// `(path, source)` was already recorded; nothing changed.
    AlreadyPresent,
    /// No record for this digest.
    NotFound,
}

/// Abstract catalog backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](MetadataStore::get) | Point lookup by digest |
/// | [`insert_new`](MetadataStore::insert_new) | Insert if absent |
/// | [`append_location`](MetadataStore::append_location) | Add a provenance entry |
/// | [`merge_tags`](MetadataStore::merge_tags) | Union tags into a record |
/// | [`merge_metadata`](MetadataStore::merge_metadata) | Upsert metadata keys |
/// | [`set_state`](MetadataStore::set_state) | Mark content pending/stored/faulted |
/// | [`transition_state`](MetadataStore::transition_state) | Change state only from an expected one |
/// | [`find_by_prefix`](MetadataStore::find_by_prefix) | Digest prefix lookup |
/// | [`scan`](MetadataStore::scan) | Filtered, ordered listing |
/// | [`stats`](MetadataStore::stats) | Aggregate statistics |
/// | [`all_digests`](MetadataStore::all_digests) | Every digest, for audits |
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, digest: &Digest) -> Result<Option<ContentRecord>>;

    /// Insert `record` unless its digest is already present.
    ///
    /// Fails if `record.locations` is empty.
    async fn insert_new(&self, record: &ContentRecord) -> Result<InsertOutcome>;

    async fn append_location(
        &self,
        digest: &Digest,
        provenance: &Provenance,
    ) -> Result<AppendOutcome>;

    /// Union `tags` into the record's tag set. No-op for unknown digests.
    async fn merge_tags(&self, digest: &Digest, tags: &[String]) -> Result<()>;

    /// Upsert top-level metadata keys, last writer wins per key. No-op for
    /// unknown digests.
    async fn merge_metadata(
        &self,
        digest: &Digest,
        entries: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;

    /// Returns `false` if the digest is unknown.
    async fn set_state(&self, digest: &Digest, state: ContentState) -> Result<bool>;

    /// Set the state to `to` only if it is currently `from`.
    ///
    /// Returns `false` if the digest is unknown or its state was not `from`,
    /// in which case nothing changed.
    async fn transition_state(
        &self,
        digest: &Digest,
        from: ContentState,
        to: ContentState,
    ) -> Result<bool>;

    /// Records whose digest starts with `prefix`, at most `limit` of them.
    async fn find_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<ContentRecord>>;

    async fn scan(
        &self,
        filter: &RecordFilter,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ContentRecord>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn all_digests(&self) -> Result<Vec<Digest>>;
}
