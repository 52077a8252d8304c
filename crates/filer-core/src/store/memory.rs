//! In-memory [`MetadataStore`] implementation for testing and embedding.
//!
//! Records live in a `BTreeMap` behind a `std::sync::RwLock`. Every mutating
//! method does its check and its write under one write guard, which gives the
//! same insert-if-absent and append-if-absent guarantees as the SQLite store
//! within a single process.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::digest::Digest;
use crate::models::{ContentRecord, ContentState, Provenance};
use crate::query::{aggregate, sort_records, ListOrder, RecordFilter, StoreStats};

use super::{AppendOutcome, InsertOutcome, MetadataStore};

/// In-memory store for tests and single-process embedding.
pub struct InMemoryStore {
    records: RwLock<BTreeMap<Digest, ContentRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Digest, ContentRecord>>> {
        self.records
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Digest, ContentRecord>>> {
        self.records
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get(&self, digest: &Digest) -> Result<Option<ContentRecord>> {
        Ok(self.read()?.get(digest).cloned())
    }

    async fn insert_new(&self, record: &ContentRecord) -> Result<InsertOutcome> {
        if record.locations.is_empty() {
            bail!("record {} has no locations", record.digest);
        }
        let mut records = self.write()?;
        if records.contains_key(&record.digest) {
            return Ok(InsertOutcome::Conflict);
        }
        records.insert(record.digest.clone(), record.clone());
        Ok(InsertOutcome::Created)
    }

    async fn append_location(
        &self,
        digest: &Digest,
        provenance: &Provenance,
    ) -> Result<AppendOutcome> {
        let mut records = self.write()?;
        let Some(record) = records.get_mut(digest) else {
            return Ok(AppendOutcome::NotFound);
        };
        if record.has_location(&provenance.path, &provenance.source) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        record.locations.push(provenance.clone());
        Ok(AppendOutcome::Appended)
    }

    async fn merge_tags(&self, digest: &Digest, tags: &[String]) -> Result<()> {
        if let Some(record) = self.write()?.get_mut(digest) {
            record.tags.extend(tags.iter().cloned());
        }
        Ok(())
    }

    async fn merge_metadata(
        &self,
        digest: &Digest,
        entries: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        if let Some(record) = self.write()?.get_mut(digest) {
            for (k, v) in entries {
                record.metadata.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn set_state(&self, digest: &Digest, state: ContentState) -> Result<bool> {
        match self.write()?.get_mut(digest) {
            Some(record) => {
                record.state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn transition_state(
        &self,
        digest: &Digest,
        from: ContentState,
        to: ContentState,
    ) -> Result<bool> {
        match self.write()?.get_mut(digest) {
            Some(record) if record.state == from => {
                record.state = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<ContentRecord>> {
        Ok(self
            .read()?
            .values()
            .filter(|r| r.digest.as_str().starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn scan(
        &self,
        filter: &RecordFilter,
        order: ListOrder,
        limit: Option<usize>,
    ) -> Result<Vec<ContentRecord>> {
        let mut out: Vec<ContentRecord> = self
            .read()?
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_records(&mut out, order);
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(aggregate(self.read()?.values()))
    }

    async fn all_digests(&self) -> Result<Vec<Digest>> {
        Ok(self.read()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::executor::block_on;
    use std::sync::Arc;

    fn record_for(body: &[u8], path: &str, source: &str) -> ContentRecord {
        ContentRecord {
            digest: Digest::of_bytes(body),
            size: body.len() as u64,
            mime_type: None,
            extension: None,
            original_filename: None,
            created_at: None,
            modified_at: None,
            imported_at: Utc::now(),
            storage_path: "blob".into(),
            state: ContentState::Pending,
            locations: vec![Provenance::new(path, source)],
            tags: ["seed".to_string()].into_iter().collect(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn second_insert_conflicts() {
        let store = InMemoryStore::new();
        let r = record_for(b"x", "/a/f.txt", "S1");
        assert_eq!(block_on(store.insert_new(&r)).unwrap(), InsertOutcome::Created);
        assert_eq!(block_on(store.insert_new(&r)).unwrap(), InsertOutcome::Conflict);
    }

    #[test]
    fn insert_rejects_empty_locations() {
        let store = InMemoryStore::new();
        let mut r = record_for(b"x", "/a/f.txt", "S1");
        r.locations.clear();
        assert!(block_on(store.insert_new(&r)).is_err());
    }

    #[test]
    fn append_is_idempotent_per_path_and_source() {
        let store = InMemoryStore::new();
        let r = record_for(b"x", "/a/f.txt", "S1");
        block_on(store.insert_new(&r)).unwrap();

        let same = Provenance::new("/a/f.txt", "S1");
        let other_source = Provenance::new("/a/f.txt", "S2");
        assert_eq!(
            block_on(store.append_location(&r.digest, &same)).unwrap(),
            AppendOutcome::AlreadyPresent
        );
        assert_eq!(
            block_on(store.append_location(&r.digest, &other_source)).unwrap(),
            AppendOutcome::Appended
        );
        let stored = block_on(store.get(&r.digest)).unwrap().unwrap();
        assert_eq!(stored.locations.len(), 2);
        assert_eq!(stored.locations[1].source, "S2");
    }

    #[test]
    fn append_to_unknown_digest() {
        let store = InMemoryStore::new();
        let outcome = block_on(
            store.append_location(&Digest::of_bytes(b"nope"), &Provenance::new("/p", "s")),
        )
        .unwrap();
        assert_eq!(outcome, AppendOutcome::NotFound);
    }

    #[test]
    fn tags_only_grow_and_metadata_overwrites_per_key() {
        let store = InMemoryStore::new();
        let r = record_for(b"x", "/a/f.txt", "S1");
        block_on(store.insert_new(&r)).unwrap();

        block_on(store.merge_tags(&r.digest, &["b".into(), "seed".into()])).unwrap();
        let mut meta = serde_json::Map::new();
        meta.insert("camera".into(), serde_json::json!("X100"));
        block_on(store.merge_metadata(&r.digest, &meta)).unwrap();
        meta.insert("camera".into(), serde_json::json!("X100V"));
        meta.insert("iso".into(), serde_json::json!(200));
        block_on(store.merge_metadata(&r.digest, &meta)).unwrap();

        let stored = block_on(store.get(&r.digest)).unwrap().unwrap();
        assert_eq!(
            stored.tags.iter().cloned().collect::<Vec<_>>(),
            vec!["b".to_string(), "seed".to_string()]
        );
        assert_eq!(stored.metadata["camera"], "X100V");
        assert_eq!(stored.metadata["iso"], 200);
    }

    #[test]
    fn concurrent_identical_appends_store_one_entry() {
        let store = Arc::new(InMemoryStore::new());
        let r = record_for(b"x", "/a/f.txt", "S1");
        block_on(store.insert_new(&r)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let digest = r.digest.clone();
                std::thread::spawn(move || {
                    block_on(store.append_location(&digest, &Provenance::new("/b/f.txt", "S2")))
                        .unwrap()
                })
            })
            .collect();
        let appended = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == AppendOutcome::Appended)
            .count();

        assert_eq!(appended, 1);
        let stored = block_on(store.get(&r.digest)).unwrap().unwrap();
        assert_eq!(stored.locations.len(), 2);
    }

    #[test]
    fn transition_only_applies_from_the_expected_state() {
        let store = InMemoryStore::new();
        let r = record_for(b"x", "/a/f.txt", "S1");
        block_on(store.insert_new(&r)).unwrap();
        block_on(store.set_state(&r.digest, ContentState::Stored)).unwrap();

        let downgraded = block_on(store.transition_state(
            &r.digest,
            ContentState::Pending,
            ContentState::Faulted,
        ))
        .unwrap();
        assert!(!downgraded);
        assert_eq!(
            block_on(store.get(&r.digest)).unwrap().unwrap().state,
            ContentState::Stored
        );

        block_on(store.set_state(&r.digest, ContentState::Pending)).unwrap();
        assert!(block_on(store.transition_state(
            &r.digest,
            ContentState::Pending,
            ContentState::Faulted,
        ))
        .unwrap());
        assert_eq!(
            block_on(store.get(&r.digest)).unwrap().unwrap().state,
            ContentState::Faulted
        );

        let unknown = Digest::of_bytes(b"nope");
        assert!(!block_on(store.transition_state(
            &unknown,
            ContentState::Pending,
            ContentState::Faulted,
        ))
        .unwrap());
    }

    #[test]
    fn prefix_lookup_respects_limit() {
        let store = InMemoryStore::new();
        for body in [b"a".as_slice(), b"b", b"c"] {
            block_on(store.insert_new(&record_for(body, "/p", "s"))).unwrap();
        }
        let all = block_on(store.find_by_prefix("", 2)).unwrap();
        assert_eq!(all.len(), 2);
        let d = Digest::of_bytes(b"a");
        let one = block_on(store.find_by_prefix(d.as_str(), 2)).unwrap();
        assert_eq!(one.len(), 1);
    }
}
