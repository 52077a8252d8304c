//! Core data models for the content store.
//!
//! One [`ContentRecord`] exists per unique digest. Every place the content
//! was seen is kept as a [`Provenance`] entry on that record.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// A recorded observation of content at a path, attributed to a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub path: String,
    pub source: String,
    pub discovered_at: DateTime<Utc>,
}

impl Provenance {
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            discovered_at: Utc::now(),
        }
    }

    /// Two entries describe the same observation if path and source match.
    pub fn same_origin(&self, path: &str, source: &str) -> bool {
        self.path == path && self.source == source
    }
}

/// Whether a record's content has been confirmed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentState {
    /// Record inserted; content copy not yet confirmed.
    Pending,
    /// Content is in place at `storage_path`.
    Stored,
    /// Copy failed after the record was inserted.
    Faulted,
}

impl ContentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentState::Pending => "pending",
            ContentState::Stored => "stored",
            ContentState::Faulted => "faulted",
        }
    }
}

impl fmt::Display for ContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContentState::Pending),
            "stored" => Ok(ContentState::Stored),
            "faulted" => Ok(ContentState::Faulted),
            other => anyhow::bail!("unknown content state: '{}'", other),
        }
    }
}

/// The unit of deduplication: one per unique digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub digest: Digest,
    pub size: u64,
    pub mime_type: Option<String>,
    pub extension: Option<String>,
    pub original_filename: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub imported_at: DateTime<Utc>,
    pub storage_path: PathBuf,
    pub state: ContentState,
    pub locations: Vec<Provenance>,
    pub tags: BTreeSet<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContentRecord {
    pub fn has_location(&self, path: &str, source: &str) -> bool {
        self.locations.iter().any(|p| p.same_origin(path, source))
    }

    /// The first path this content was seen at.
    pub fn first_path(&self) -> Option<&str> {
        self.locations.first().map(|p| p.path.as_str())
    }
}
