//! Checksum computation for manifests.
//!
//! OVF 0.x/1.x manifests use SHA1; OVF 2.x uses SHA256. Large members are
//! hashed in streaming fashion so memory stays bounded regardless of disk
//! image size.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

use crate::error::Result;
use crate::names::OvfVersion;

/// Digest algorithm used for package manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// The algorithm mandated for the given OVF version.
    pub fn for_version(version: OvfVersion) -> Self {
        match version {
            OvfVersion::V0_9 | OvfVersion::V1 => ChecksumAlgorithm::Sha1,
            OvfVersion::V2 => ChecksumAlgorithm::Sha256,
        }
    }

    /// Uppercase token used in manifest lines, e.g. `SHA1`.
    pub fn token(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1 => "SHA1",
            ChecksumAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Parse a manifest algorithm token (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "SHA1" => Some(ChecksumAlgorithm::Sha1),
            "SHA256" => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Length of the hex digest string.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Sha1 => 40,
            ChecksumAlgorithm::Sha256 => 64,
        }
    }

    /// Compute the digest of a byte slice as lowercase hex.
    pub fn digest_bytes(self, data: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(data);
                hex_encode(&hasher.finalize())
            }
            ChecksumAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hex_encode(&hasher.finalize())
            }
        }
    }

    /// Stream a reader through the digest. Returns (hex digest, bytes read).
    pub fn digest_reader(self, reader: &mut dyn Read) -> Result<(String, u64)> {
        let mut hasher = StreamingHasher::new(self);
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((hasher.finalize(), total))
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Encode bytes as lowercase hex string.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Incremental hasher over either algorithm.
pub enum StreamingHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl StreamingHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => StreamingHasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => StreamingHasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHasher::Sha1(h) => h.update(data),
            StreamingHasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> String {
        match self {
            StreamingHasher::Sha1(h) => hex_encode(&h.finalize()),
            StreamingHasher::Sha256(h) => hex_encode(&h.finalize()),
        }
    }
}

/// A writer wrapper that computes a digest while writing.
///
/// This allows hashing package members as they stream to the output,
/// avoiding the need to buffer the entire content in memory.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: StreamingHasher,
    bytes_written: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Create a new digest writer wrapping the given writer.
    pub fn new(inner: W, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            inner,
            hasher: StreamingHasher::new(algorithm),
            bytes_written: 0,
        }
    }

    /// Finish writing and return the inner writer, hex digest, and bytes
    /// written.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, self.hasher.finalize(), self.bytes_written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
