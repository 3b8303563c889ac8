//! Checksum utilities for input fingerprints
//!
//! Two runs over byte-identical input must produce identical collections, so
//! every load records the SHA-256 of the file it read. [`HashingReader`]
//! computes the digest while the CSV parser consumes the file, avoiding a
//! second pass over large inputs.

use sha2::{Digest, Sha256};
use std::io::Read;

/// Reader adapter that hashes every byte it hands out
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes passed through so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consume the reader and return the hex digest of everything read
    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}
