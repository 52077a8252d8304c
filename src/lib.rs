//! # filer
//!
//! A content-addressable file store with provenance.
//!
//! Every distinct byte sequence is stored exactly once, keyed by its SHA-256
//! digest. Every path it was ever seen at is kept as a provenance entry on
//! its record, so duplicates across disks, backups and machines collapse
//! into one stored copy with a full list of where it came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ file / dir │──▶│  Ingestor   │──▶│ SQLite store │  one record per digest
//! └────────────┘   │ hash+settle │   └──────┬───────┘
//!                  └──────┬──────┘          │
//!                         ▼                 │
//!                  ┌─────────────┐          │
//!                  │  BlobStore  │  root/ab/cd/abcd…
//!                  └──────┬──────┘          │
//!                         └───────┬─────────┘
//!                      ┌──────────┴─────────┐
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │ (filer)  │        │ (viewer) │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! filer init                              # create database
//! filer ingest ~/Pictures --source laptop # ingest a directory
//! filer search --tag 2019
//! filer info 3f2a                         # digest prefix lookup
//! filer serve                             # start the viewer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite metadata store |
//! | [`storage`] | Sharded blob tree |
//! | [`ingest`] | Ingestion engine |
//! | [`progress`] | Batch progress reporting |
//! | [`query`] | Search, listing, lookup, resolve |
//! | [`stats`] | Store statistics |
//! | [`integrity`] | Store audit |
//! | [`server`] | HTTP viewer |
//!
//! Pure types and the [`MetadataStore`](filer_core::store::MetadataStore)
//! trait live in [`filer_core`], re-exported here as [`core`].

pub use filer_core as core;

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod integrity;
pub mod migrate;
pub mod progress;
pub mod query;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod storage;
