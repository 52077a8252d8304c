//! Sharded on-disk layout for stored content.
//!
//! A digest `d` lives at `root/d[0:2]/d[2:4]/d`. Two levels of two hex
//! characters give 65,536 leaf directories, which keeps per-directory entry
//! counts small without needing a separate index.
//!
//! ```text
//! storage/
//!   e3/
//!     b0/
//!       e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
//! ```

use std::path::{Path, PathBuf};

use crate::digest::Digest;

/// Hex characters per shard directory name.
pub const SHARD_WIDTH: usize = 2;

/// Number of nested shard directories.
pub const SHARD_DEPTH: usize = 2;

/// Canonical path for `digest` under `root`.
pub fn shard_path(root: &Path, digest: &Digest) -> PathBuf {
    let hex = digest.as_str();
    let mut path = root.to_path_buf();
    for level in 0..SHARD_DEPTH {
        let start = level * SHARD_WIDTH;
        path.push(&hex[start..start + SHARD_WIDTH]);
    }
    path.push(hex);
    path
}

/// Recover a digest from a file name found in the storage tree.
///
/// Returns `None` for anything that is not a canonical content file, such as
/// in-flight temp files.
pub fn digest_from_file_name(name: &str) -> Option<Digest> {
    Digest::parse(name).ok().filter(|d| d.as_str() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::EMPTY_DIGEST;

    #[test]
    fn shards_by_leading_hex_pairs() {
        let d = Digest::parse(EMPTY_DIGEST).unwrap();
        let p = shard_path(Path::new("/store"), &d);
        assert_eq!(p, Path::new("/store/e3/b0").join(EMPTY_DIGEST));
    }

    #[test]
    fn layout_is_deterministic() {
        let d = Digest::of_bytes(b"x");
        assert_eq!(
            shard_path(Path::new("root"), &d),
            shard_path(Path::new("root"), &d)
        );
    }

    #[test]
    fn temp_names_are_not_digests() {
        assert!(digest_from_file_name(EMPTY_DIGEST).is_some());
        assert!(digest_from_file_name(&format!(".{}.1234.tmp", EMPTY_DIGEST)).is_none());
        assert!(digest_from_file_name(&EMPTY_DIGEST.to_ascii_uppercase()).is_none());
    }
}
