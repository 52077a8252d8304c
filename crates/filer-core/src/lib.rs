//! # Filer Core
//!
//! Shared, I/O-agnostic logic for filer: content digests, the sharded
//! storage layout, the content record model, the metadata store trait and
//! query aggregation.
//!
//! This crate contains no tokio, sqlx, or directory-walking dependencies.
//! Hashing works over any [`std::io::Read`], so callers decide where bytes
//! come from.

pub mod digest;
pub mod layout;
pub mod models;
pub mod query;
pub mod store;
