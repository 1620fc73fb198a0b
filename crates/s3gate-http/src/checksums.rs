//! Checksum algorithms accepted for payload integrity.
//!
//! Covers `Content-MD5`, `x-amz-content-sha256`, and the additional
//! `x-amz-checksum-*` algorithms. [`StreamingHasher`] feeds every requested
//! algorithm from a single pass over the body.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use digest::Digest;

// ---------------------------------------------------------------------------
// ChecksumAlgorithm
// ---------------------------------------------------------------------------

/// Digest algorithms the gateway can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5, declared through `Content-MD5`.
    Md5,
    /// CRC-32 (IEEE 802.3).
    Crc32,
    /// CRC-32C (Castagnoli).
    Crc32c,
    /// CRC-64/NVME.
    Crc64Nvme,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Algorithms that have an `x-amz-checksum-*` header.
    pub const ADDITIONAL: [Self; 5] = [
        Self::Crc32,
        Self::Crc32c,
        Self::Crc64Nvme,
        Self::Sha1,
        Self::Sha256,
    ];

    /// Canonical upper-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Crc64Nvme => "CRC64NVME",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// The `x-amz-checksum-*` header name, if the algorithm has one.
    #[must_use]
    pub fn header_name(&self) -> Option<&'static str> {
        match self {
            Self::Md5 => None,
            Self::Crc32 => Some("x-amz-checksum-crc32"),
            Self::Crc32c => Some("x-amz-checksum-crc32c"),
            Self::Crc64Nvme => Some("x-amz-checksum-crc64nvme"),
            Self::Sha1 => Some("x-amz-checksum-sha1"),
            Self::Sha256 => Some("x-amz-checksum-sha256"),
        }
    }

    /// Look up an algorithm by its `x-amz-checksum-*` header name.
    #[must_use]
    pub fn from_header_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ADDITIONAL
            .into_iter()
            .find(|algo| algo.header_name() == Some(name.as_str()))
    }

    /// Length of the raw digest in bytes.
    #[must_use]
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Crc32 | Self::Crc32c => 4,
            Self::Crc64Nvme => 8,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`ChecksumAlgorithm`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown checksum algorithm: {0}")]
pub struct ParseChecksumAlgorithmError(String);

impl FromStr for ChecksumAlgorithm {
    type Err = ParseChecksumAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "CRC32" => Ok(Self::Crc32),
            "CRC32C" => Ok(Self::Crc32c),
            "CRC64NVME" => Ok(Self::Crc64Nvme),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            _ => Err(ParseChecksumAlgorithmError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// ChecksumValue
// ---------------------------------------------------------------------------

/// A raw digest paired with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    /// The algorithm used to compute this checksum.
    pub algorithm: ChecksumAlgorithm,
    /// Raw digest bytes, big-endian for CRCs.
    pub digest: Vec<u8>,
}

impl ChecksumValue {
    /// Base64 form, as used by `Content-MD5` and `x-amz-checksum-*`.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.digest)
    }

    /// Lower-case hex form, as used by `x-amz-content-sha256` and ETags.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// Decode a base64 digest and check its length for `algorithm`.
#[must_use]
pub fn decode_base64_digest(algorithm: ChecksumAlgorithm, value: &str) -> Option<Vec<u8>> {
    BASE64_STANDARD
        .decode(value.trim())
        .ok()
        .filter(|digest| digest.len() == algorithm.digest_len())
}

/// Compute a base64-encoded checksum for the given algorithm.
///
/// # Examples
///
/// ```
/// use s3gate_http::checksums::{ChecksumAlgorithm, compute_checksum};
///
/// assert_eq!(compute_checksum(ChecksumAlgorithm::Md5, b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
/// ```
#[must_use]
pub fn compute_checksum(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = StreamingHasher::new(&[algorithm]);
    hasher.update(data);
    hasher
        .finish()
        .into_iter()
        .next()
        .map(|value| value.to_base64())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// StreamingHasher
// ---------------------------------------------------------------------------

enum HasherState {
    Md5(md5::Md5),
    Crc32(crc32fast::Hasher),
    Crc32c(u32),
    Crc64Nvme(crc64fast_nvme::Digest),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl HasherState {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(<md5::Md5 as Digest>::new()),
            ChecksumAlgorithm::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
            ChecksumAlgorithm::Crc32c => Self::Crc32c(0),
            ChecksumAlgorithm::Crc64Nvme => Self::Crc64Nvme(crc64fast_nvme::Digest::new()),
            ChecksumAlgorithm::Sha1 => Self::Sha1(<sha1::Sha1 as Digest>::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(<sha2::Sha256 as Digest>::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => Digest::update(h, data),
            Self::Crc32(h) => h.update(data),
            Self::Crc32c(val) => *val = crc32c::crc32c_append(*val, data),
            Self::Crc64Nvme(h) => h.write(data),
            Self::Sha1(h) => Digest::update(h, data),
            Self::Sha256(h) => Digest::update(h, data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => Digest::finalize(h).to_vec(),
            Self::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Self::Crc32c(val) => val.to_be_bytes().to_vec(),
            Self::Crc64Nvme(h) => h.sum64().to_be_bytes().to_vec(),
            Self::Sha1(h) => Digest::finalize(h).to_vec(),
            Self::Sha256(h) => Digest::finalize(h).to_vec(),
        }
    }
}

/// Incremental hasher over a stream of data chunks.
///
/// # Examples
///
/// ```
/// use s3gate_http::checksums::{ChecksumAlgorithm, StreamingHasher};
///
/// let mut hasher = StreamingHasher::new(&[ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Md5]);
/// hasher.update(b"hello ");
/// hasher.update(b"world");
/// let values = hasher.finish();
/// assert_eq!(values.len(), 2);
/// assert_eq!(values[1].to_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
/// ```
pub struct StreamingHasher {
    states: Vec<(ChecksumAlgorithm, HasherState)>,
    bytes: u64,
}

impl fmt::Debug for StreamingHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingHasher")
            .field(
                "algorithms",
                &self.states.iter().map(|(a, _)| *a).collect::<Vec<_>>(),
            )
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl StreamingHasher {
    /// A hasher for each distinct algorithm in `algorithms`.
    #[must_use]
    pub fn new(algorithms: &[ChecksumAlgorithm]) -> Self {
        let mut states: Vec<(ChecksumAlgorithm, HasherState)> = Vec::with_capacity(algorithms.len());
        for &algo in algorithms {
            if !states.iter().any(|(a, _)| *a == algo) {
                states.push((algo, HasherState::new(algo)));
            }
        }
        Self { states, bytes: 0 }
    }

    /// Feed more data into every hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.bytes += data.len() as u64;
        for (_, state) in &mut self.states {
            state.update(data);
        }
    }

    /// Bytes fed so far.
    #[must_use]
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Finalize, in the order the algorithms were first requested.
    #[must_use]
    pub fn finish(self) -> Vec<ChecksumValue> {
        self.states
            .into_iter()
            .map(|(algorithm, state)| ChecksumValue {
                algorithm,
                digest: state.finish(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_checksum_algorithm() {
        assert_eq!(
            "crc64nvme".parse::<ChecksumAlgorithm>().ok(),
            Some(ChecksumAlgorithm::Crc64Nvme)
        );
        assert!("blake3".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_should_resolve_header_names() {
        assert_eq!(
            ChecksumAlgorithm::from_header_name("X-Amz-Checksum-CRC32C"),
            Some(ChecksumAlgorithm::Crc32c)
        );
        assert_eq!(ChecksumAlgorithm::from_header_name("content-md5"), None);
        assert_eq!(ChecksumAlgorithm::Md5.header_name(), None);
    }

    #[test]
    fn test_should_compute_known_checksums() {
        assert_eq!(compute_checksum(ChecksumAlgorithm::Crc32, b"hello world"), "DUoRhQ==");
        assert_eq!(compute_checksum(ChecksumAlgorithm::Crc32c, b"hello world"), "yZRlqg==");
        assert_eq!(
            compute_checksum(ChecksumAlgorithm::Sha1, b"hello world"),
            "Kq5sNclPz7QV2+lfQIuc6R7oRu0="
        );
        assert_eq!(
            compute_checksum(ChecksumAlgorithm::Sha256, b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_should_match_one_shot_when_streaming() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut hasher = StreamingHasher::new(&ChecksumAlgorithm::ADDITIONAL);
        for piece in data.chunks(7) {
            hasher.update(piece);
        }
        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        for value in hasher.finish() {
            assert_eq!(value.to_base64(), compute_checksum(value.algorithm, data));
            assert_eq!(value.digest.len(), value.algorithm.digest_len());
        }
    }

    #[test]
    fn test_should_deduplicate_algorithms() {
        let hasher = StreamingHasher::new(&[ChecksumAlgorithm::Md5, ChecksumAlgorithm::Md5]);
        assert_eq!(hasher.finish().len(), 1);
    }

    #[test]
    fn test_should_reject_digest_of_wrong_length() {
        assert!(decode_base64_digest(ChecksumAlgorithm::Md5, "DUoRhQ==").is_none());
        assert!(decode_base64_digest(ChecksumAlgorithm::Crc32, "DUoRhQ==").is_some());
        assert!(decode_base64_digest(ChecksumAlgorithm::Crc32, "not base64!").is_none());
    }
}
