//! Blob storage: the sharded content tree on disk.
//!
//! Content for digest `d` lives at `root/d[0:2]/d[2:4]/d` (see
//! [`filer_core::layout`]). Writes go to a uniquely named temp file in the
//! same shard directory and are renamed onto the canonical name only once
//! complete, so nobody ever observes a partially written blob. Concurrent
//! `put`s of the same digest each write their own temp file and the last
//! rename wins with identical bytes.
//!
//! Existence of a blob is never taken as proof that content is known; the
//! metadata store decides that.

use std::io;
use std::path::{Path, PathBuf};

use filer_core::digest::{digest_reader, ContentHasher, Digest};
use filer_core::layout::shard_path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::{FilerError, Result};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of in-flight temp files inside shard directories.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Result of [`BlobStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    AlreadyPresent,
}

/// Handle on the sharded content tree.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    verify_on_put: bool,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, verify_on_put: bool) -> Self {
        Self {
            root: root.into(),
            verify_on_put,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root, config.verify_on_put)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path for `digest`. Pure; touches nothing on disk.
    pub fn locate(&self, digest: &Digest) -> PathBuf {
        shard_path(&self.root, digest)
    }

    pub async fn contains(&self, digest: &Digest) -> Result<bool> {
        let path = self.locate(digest);
        fs::try_exists(&path)
            .await
            .map_err(|e| FilerError::io(path, e))
    }

    /// Copy `source` into the store under `digest`.
    ///
    /// A no-op if the canonical file already exists. With `verify_on_put`
    /// the copied bytes are re-hashed and a mismatch aborts the write.
    pub async fn put(&self, digest: &Digest, source: &Path) -> Result<PutOutcome> {
        let dest = self.locate(digest);
        if fs::try_exists(&dest)
            .await
            .map_err(|e| FilerError::io(&dest, e))?
        {
            debug!(digest = %digest, "content already stored");
            return Ok(PutOutcome::AlreadyPresent);
        }

        let shard = dest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        // create_dir_all treats a directory created concurrently as success
        fs::create_dir_all(&shard)
            .await
            .map_err(|e| FilerError::io(&shard, e))?;

        let tmp = shard.join(format!(
            ".{}.{}{}",
            digest,
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));
        let guard = TempGuard::new(tmp.clone());

        let copied = copy_hashing(source, &tmp).await?;
        let (actual, size) = copied.finish();
        if self.verify_on_put && actual != *digest {
            warn!(
                expected = %digest,
                actual = %actual,
                source = %source.display(),
                "source changed between hashing and copying"
            );
            return Err(FilerError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        fs::rename(&tmp, &dest)
            .await
            .map_err(|e| FilerError::io(&dest, e))?;
        guard.disarm();

        debug!(digest = %digest, bytes = size, path = %dest.display(), "content stored");
        Ok(PutOutcome::Written)
    }

    /// Re-hash stored content and compare with its digest.
    ///
    /// A missing blob is an `Io` error with `NotFound` kind.
    pub async fn verify(&self, digest: &Digest) -> Result<bool> {
        let (actual, _) = hash_file(&self.locate(digest)).await?;
        Ok(actual == *digest)
    }
}

/// Stream `source` into a freshly created `tmp`, hashing as it goes.
async fn copy_hashing(source: &Path, tmp: &Path) -> Result<ContentHasher> {
    let mut src = fs::File::open(source)
        .await
        .map_err(|e| FilerError::io(source, e))?;
    let mut dst = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await
        .map_err(|e| FilerError::io(tmp, e))?;

    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = src
            .read(&mut buffer)
            .await
            .map_err(|e| FilerError::io(source, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        dst.write_all(&buffer[..n])
            .await
            .map_err(|e| FilerError::io(tmp, e))?;
    }

    dst.flush().await.map_err(|e| FilerError::io(tmp, e))?;
    dst.sync_all().await.map_err(|e| FilerError::io(tmp, e))?;
    Ok(hasher)
}

/// Hash a file on a blocking thread.
pub async fn hash_file(path: &Path) -> Result<(Digest, u64)> {
    let owned = path.to_path_buf();
    let joined = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&owned)?;
        digest_reader(io::BufReader::new(file))
    })
    .await
    .map_err(|e| FilerError::io(path, io::Error::new(io::ErrorKind::Other, e)))?;

    joined.map_err(|e| FilerError::io(path, e))
}

/// Removes a temp file on drop unless disarmed. Covers both error returns
/// and cancellation of the owning future.
struct TempGuard {
    path: Option<PathBuf>,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
