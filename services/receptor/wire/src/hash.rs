//! Streaming SHA-256 content hashing.
//!
//! Digests are rendered as URL-safe base64 (with padding) so they can travel
//! in a header line unchanged.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Default copy buffer size (5 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Resolve a caller-supplied buffer size, falling back to the default for zero
pub fn effective_buffer_size(buffer_size: usize) -> usize {
    if buffer_size == 0 {
        DEFAULT_BUFFER_SIZE
    } else {
        buffer_size
    }
}

/// URL-safe base64 SHA-256 digest of a payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash an in-memory payload
    pub fn of(data: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(data).as_slice())
    }

    fn from_digest(digest: &[u8]) -> Self {
        ContentHash(URL_SAFE.encode(digest))
    }

    /// Wrap an already encoded digest (e.g. parsed from a header)
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        ContentHash(encoded.into())
    }

    /// Encoded digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read adapter that digests every byte passing through it
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Bytes observed so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish hashing, returning the digest, byte count and the inner reader
    pub fn finish(self) -> (ContentHash, u64, R) {
        let digest = self.hasher.finalize();
        (
            ContentHash::from_digest(digest.as_slice()),
            self.bytes_read,
            self.inner,
        )
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Incremental hasher for bytes that are consumed piecemeal
#[derive(Clone, Default)]
pub struct StreamHasher {
    hasher: Sha256,
    len: u64,
}

impl StreamHasher {
    /// Create an empty hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes fed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been fed yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish hashing
    pub fn finish(self) -> ContentHash {
        ContentHash::from_digest(self.hasher.finalize().as_slice())
    }
}

/// Consume `source` to exhaustion through a fixed-size buffer and return its digest
/// together with the number of bytes read.
///
/// A read error means the digest is unusable and is propagated as-is.
pub fn compute_hash<R: Read>(source: R, buffer_size: usize) -> io::Result<(ContentHash, u64)> {
    let mut buf = vec![0u8; effective_buffer_size(buffer_size)];
    digest_through(source, &mut buf)
}

/// Like [`compute_hash`] but reuses a caller-owned buffer
pub fn digest_through<R: Read>(source: R, buf: &mut [u8]) -> io::Result<(ContentHash, u64)> {
    if buf.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty hash buffer"));
    }
    let mut reader = HashingReader::new(source);
    loop {
        match reader.read(buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    let (hash, len, _) = reader.finish();
    Ok((hash, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc"), URL-safe alphabet
        let hash = ContentHash::of(b"abc");
        assert_eq!(hash.as_str(), "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0=");
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (streamed, len) = compute_hash(&data[..], 7).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(streamed, ContentHash::of(&data));
    }

    #[test]
    fn test_zero_buffer_uses_default() {
        assert_eq!(effective_buffer_size(0), DEFAULT_BUFFER_SIZE);
        assert_eq!(effective_buffer_size(16), 16);
        let (hash, len) = compute_hash(&b""[..], 0).unwrap();
        assert_eq!(len, 0);
        assert_eq!(hash, ContentHash::of(b""));
    }

    #[test]
    fn test_read_error_propagates() {
        assert!(compute_hash(FailingReader, 64).is_err());
    }

    #[test]
    fn test_stream_hasher() {
        let mut hasher = StreamHasher::new();
        assert!(hasher.is_empty());
        hasher.update(b"ab");
        hasher.update(b"c");
        assert_eq!(hasher.len(), 3);
        assert_eq!(hasher.finish(), ContentHash::of(b"abc"));
    }
}
