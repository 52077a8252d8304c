//! Error taxonomy for ingestion, storage and queries.
//!
//! Per-file problems (`NotFound`, `NotAFile`, `Io`) stay local to one
//! ingestion and are tallied in batch summaries. `StoreIntegrityFault` is
//! the one condition that must always be surfaced: it means a record and its
//! stored content disagree, and the engine never repairs that on its own
//! unless it recorded the fault itself.

use std::path::PathBuf;

use filer_core::digest::InvalidDigest;

pub type Result<T, E = FilerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum FilerError {
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("content changed while copying: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error(transparent)]
    InvalidDigest(#[from] InvalidDigest),

    #[error("no stored content matches '{0}'")]
    DigestNotFound(String),

    #[error("prefix '{prefix}' is ambiguous: {matches} records match")]
    AmbiguousPrefix { prefix: String, matches: usize },

    #[error("store integrity fault for {digest}: {detail}")]
    StoreIntegrityFault { digest: String, detail: String },

    #[error("metadata store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl FilerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FilerError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn integrity(digest: impl ToString, detail: impl Into<String>) -> Self {
        FilerError::StoreIntegrityFault {
            digest: digest.to_string(),
            detail: detail.into(),
        }
    }

    /// Short machine-readable code, used in JSON output and HTTP errors.
    pub fn code(&self) -> &'static str {
        match self {
            FilerError::NotFound(_) => "not_found",
            FilerError::NotAFile(_) => "not_a_file",
            FilerError::Io { .. } => "io_error",
            FilerError::DigestMismatch { .. } => "digest_mismatch",
            FilerError::InvalidDigest(_) => "bad_request",
            FilerError::DigestNotFound(_) => "not_found",
            FilerError::AmbiguousPrefix { .. } => "ambiguous_prefix",
            FilerError::StoreIntegrityFault { .. } => "integrity_fault",
            FilerError::Store(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_path() {
        let err = FilerError::io(
            "/data/a.bin",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/data/a.bin"), "{}", msg);
        assert!(msg.contains("denied"), "{}", msg);
        assert_eq!(err.code(), "io_error");
    }

    #[test]
    fn ambiguity_reports_match_count() {
        let err = FilerError::AmbiguousPrefix {
            prefix: "ab".into(),
            matches: 2,
        };
        assert_eq!(err.to_string(), "prefix 'ab' is ambiguous: 2 records match");
    }
}
