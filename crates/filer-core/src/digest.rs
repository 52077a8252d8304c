//! Content digests.
//!
//! A [`Digest`] is the lowercase hex SHA-256 of a byte sequence. It is the
//! identity of stored content: two files with the same digest are the same
//! content, and the digest alone determines where the bytes live on disk.
//!
//! Hashing is streaming. [`digest_reader`] folds fixed-size chunks into a
//! [`ContentHasher`], so memory use does not depend on input size.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Read buffer used when streaming content through the hasher.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Length of a digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 of zero bytes.
pub const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Hex SHA-256 of some content. Always 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

/// Returned when a string is not a well-formed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDigest(pub String);

impl fmt::Display for InvalidDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a sha-256 hex digest: '{}'", self.0)
    }
}

impl std::error::Error for InvalidDigest {}

impl Digest {
    /// Parse a full digest. Uppercase hex is accepted and normalized.
    pub fn parse(s: &str) -> Result<Self, InvalidDigest> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.len() != DIGEST_HEX_LEN || !is_hex_prefix(&lower) {
            return Err(InvalidDigest(s.to_string()));
        }
        Ok(Self(lower))
    }

    /// Digest of the given bytes, computed in one shot.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(bytes);
        hasher.finish().0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, for display.
    pub fn short(&self, n: usize) -> &str {
        &self.0[..n.min(self.0.len())]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// True if `s` is non-empty, lowercase hex and no longer than a digest.
///
/// Used to validate user-supplied digest prefixes before they reach a
/// `LIKE` pattern, so a prefix can never smuggle in wildcards.
pub fn is_hex_prefix(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= DIGEST_HEX_LEN
        && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Streaming SHA-256 accumulator that also counts bytes.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Consume the hasher, returning the digest and total byte count.
    pub fn finish(self) -> (Digest, u64) {
        (Digest(hex::encode(self.inner.finalize())), self.len)
    }
}

/// Hash everything `reader` yields, [`CHUNK_SIZE`] bytes at a time.
///
/// Interrupted reads are retried; any other read error aborts and no
/// digest is produced.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<(Digest, u64)> {
    let mut hasher = ContentHasher::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailAfter {
        remaining: usize,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk went away"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(7);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn empty_input_has_well_known_digest() {
        let (digest, size) = digest_reader(io::empty()).unwrap();
        assert_eq!(digest.as_str(), EMPTY_DIGEST);
        assert_eq!(size, 0);
    }

    #[test]
    fn streaming_matches_one_shot_across_chunk_boundaries() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let (streamed, size) = digest_reader(&data[..]).unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(streamed, Digest::of_bytes(&data));
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            Digest::of_bytes(b"hello world").as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn read_error_aborts() {
        let err = digest_reader(FailAfter { remaining: CHUNK_SIZE + 5 }).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn parse_normalizes_and_rejects() {
        let upper = EMPTY_DIGEST.to_ascii_uppercase();
        assert_eq!(Digest::parse(&upper).unwrap().as_str(), EMPTY_DIGEST);
        assert!(Digest::parse("abc").is_err());
        assert!(Digest::parse(&"g".repeat(64)).is_err());
    }

    #[test]
    fn hex_prefix_rules() {
        assert!(is_hex_prefix("e3b0"));
        assert!(!is_hex_prefix(""));
        assert!(!is_hex_prefix("e3%"));
        assert!(!is_hex_prefix("E3"));
        assert!(!is_hex_prefix(&"a".repeat(65)));
    }

    #[test]
    fn serde_goes_through_validation() {
        let ok: Digest = serde_json::from_str(&format!("\"{}\"", EMPTY_DIGEST)).unwrap();
        assert_eq!(ok.as_str(), EMPTY_DIGEST);
        assert!(serde_json::from_str::<Digest>("\"nope\"").is_err());
    }
}
