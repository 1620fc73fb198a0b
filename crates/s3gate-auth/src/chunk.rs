//! Chunk signature hash chain for `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` bodies.
//!
//! Every chunk is signed over the previous chunk's signature, so chunk *n*
//! can only be verified once chunk *n - 1* has been. The chain is seeded with
//! the request signature from the `Authorization` header.
//!
//! ```text
//! AWS4-HMAC-SHA256-PAYLOAD
//! <timestamp>
//! <scope>
//! <previous-signature>
//! <sha256("")>
//! <sha256(chunk-data)>
//! ```
//!
//! A signed trailer closes the chain with `AWS4-HMAC-SHA256-TRAILER` over the
//! hash of the canonical trailer lines.

use crate::payload::hash_payload;
use crate::sigv4::{CredentialScope, SigningKey, compute_signature, signatures_match};

const CHUNK_ALGORITHM: &str = "AWS4-HMAC-SHA256-PAYLOAD";
const TRAILER_ALGORITHM: &str = "AWS4-HMAC-SHA256-TRAILER";
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Name of the trailer line carrying the trailer signature.
pub const TRAILER_SIGNATURE_HEADER: &str = "x-amz-trailer-signature";

/// Rolling signer/verifier for one chunked body.
#[derive(Debug, Clone)]
pub struct ChunkSigner {
    signing_key: SigningKey,
    timestamp: String,
    scope: String,
    previous: String,
}

impl ChunkSigner {
    /// Start a chain seeded by `seed_signature`.
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        timestamp: &str,
        scope: &CredentialScope,
        seed_signature: &str,
    ) -> Self {
        Self {
            signing_key,
            timestamp: timestamp.to_owned(),
            scope: scope.to_string(),
            previous: seed_signature.to_owned(),
        }
    }

    /// The last accepted signature in the chain.
    #[must_use]
    pub fn previous_signature(&self) -> &str {
        &self.previous
    }

    /// String to sign for a chunk whose data hashes to `chunk_hash`.
    #[must_use]
    pub fn chunk_string_to_sign(&self, chunk_hash: &str) -> String {
        format!(
            "{CHUNK_ALGORITHM}\n{}\n{}\n{}\n{EMPTY_SHA256}\n{chunk_hash}",
            self.timestamp, self.scope, self.previous
        )
    }

    /// Sign the next chunk and advance the chain.
    pub fn next_chunk_signature(&mut self, chunk_hash: &str) -> String {
        let signature = compute_signature(&self.signing_key, &self.chunk_string_to_sign(chunk_hash));
        self.previous.clone_from(&signature);
        signature
    }

    /// Check `provided` for the next chunk. The chain only advances when the
    /// signature matches.
    pub fn verify_chunk(&mut self, chunk_hash: &str, provided: &str) -> bool {
        let expected =
            compute_signature(&self.signing_key, &self.chunk_string_to_sign(chunk_hash));
        let matched = signatures_match(&expected, provided);
        if matched {
            self.previous = expected;
        }
        matched
    }

    /// Signature over the trailer lines, chained to the final chunk.
    #[must_use]
    pub fn trailer_signature(&self, trailers: &[(String, String)]) -> String {
        let string_to_sign = format!(
            "{TRAILER_ALGORITHM}\n{}\n{}\n{}\n{}",
            self.timestamp,
            self.scope,
            self.previous,
            hash_payload(canonical_trailer(trailers).as_bytes())
        );
        compute_signature(&self.signing_key, &string_to_sign)
    }

    /// Constant-time check of a trailer signature.
    #[must_use]
    pub fn verify_trailer(&self, trailers: &[(String, String)], provided: &str) -> bool {
        signatures_match(&self.trailer_signature(trailers), provided)
    }
}

/// `name:value\n` for every trailer, in the order received.
#[must_use]
pub fn canonical_trailer(trailers: &[(String, String)]) -> String {
    trailers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name.to_ascii_lowercase(), value.trim()))
        .collect()
}

/// Frame `payload` as a signed aws-chunked body.
///
/// Used by clients and tests; the gateway itself only decodes.
#[must_use]
pub fn encode_signed_chunks(
    payload: &[u8],
    chunk_size: usize,
    signer: &mut ChunkSigner,
    trailers: &[(String, String)],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 256);
    for chunk in payload.chunks(chunk_size.max(1)) {
        let signature = signer.next_chunk_signature(&hash_payload(chunk));
        out.extend_from_slice(format!("{:x};chunk-signature={signature}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    let final_signature = signer.next_chunk_signature(EMPTY_SHA256);
    out.extend_from_slice(format!("0;chunk-signature={final_signature}\r\n").as_bytes());
    if !trailers.is_empty() {
        for (name, value) in trailers {
            out.extend_from_slice(format!("{name}:{value}\r\n").as_bytes());
        }
        let trailer_signature = signer.trailer_signature(trailers);
        out.extend_from_slice(
            format!("{TRAILER_SIGNATURE_HEADER}:{trailer_signature}\r\n").as_bytes(),
        );
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Frame `payload` as an unsigned aws-chunked body with optional trailers.
#[must_use]
pub fn encode_unsigned_chunks(
    payload: &[u8],
    chunk_size: usize,
    trailers: &[(String, String)],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 64);
    for chunk in payload.chunks(chunk_size.max(1)) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n");
    for (name, value) in trailers {
        out.extend_from_slice(format!("{name}:{value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigv4::derive_signing_key;
    use crate::sigv4::tests::TEST_SECRET_KEY;

    const SEED: &str = "4f232c4386841ef735655705268965c44a0e4690baa4adea153f7db9fa80a0a6";
    const CHUNK_1: &str = "ad80c730a21e5b8d04586a2213dd63b9a0e99e0e2307b0ade35a65485a288648";
    const CHUNK_2: &str = "0055627c9e194cb4542bae2aa5492e3c1575bbb81b612b7d234b86a503ef5497";
    const FINAL: &str = "b6c6ea8a5354eaf15b3cb7646744f4275b71ea724fed81ceb9323e279d449df9";

    fn example_signer() -> ChunkSigner {
        let scope = CredentialScope {
            date: "20130524".to_owned(),
            region: "us-east-1".to_owned(),
            service: "s3".to_owned(),
        };
        ChunkSigner::new(
            derive_signing_key(TEST_SECRET_KEY, "20130524", "us-east-1", "s3"),
            "20130524T000000Z",
            &scope,
            SEED,
        )
    }

    #[test]
    fn test_should_reproduce_aws_chunk_signatures() {
        let mut signer = example_signer();
        assert_eq!(
            signer.next_chunk_signature(&hash_payload(&[b'a'; 65536])),
            CHUNK_1
        );
        assert_eq!(
            signer.next_chunk_signature(&hash_payload(&[b'a'; 1024])),
            CHUNK_2
        );
        assert_eq!(signer.next_chunk_signature(EMPTY_SHA256), FINAL);
    }

    #[test]
    fn test_should_advance_chain_only_on_valid_chunk() {
        let mut signer = example_signer();
        let hash = hash_payload(&[b'a'; 65536]);
        assert!(!signer.verify_chunk(&hash, CHUNK_2));
        assert_eq!(signer.previous_signature(), SEED);
        assert!(signer.verify_chunk(&hash, CHUNK_1));
        assert_eq!(signer.previous_signature(), CHUNK_1);
    }

    #[test]
    fn test_should_encode_aws_chunked_example() {
        let payload = vec![b'a'; 66560];
        let encoded = encode_signed_chunks(&payload, 65536, &mut example_signer(), &[]);
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with(&format!("10000;chunk-signature={CHUNK_1}\r\n")));
        assert!(text.contains(&format!("\r\n400;chunk-signature={CHUNK_2}\r\n")));
        assert!(text.ends_with(&format!("0;chunk-signature={FINAL}\r\n\r\n")));
    }

    #[test]
    fn test_should_verify_trailer_signature_chained_to_final_chunk() {
        let mut signer = example_signer();
        let trailers = vec![("x-amz-checksum-crc32".to_owned(), "sOO8/Q==".to_owned())];
        let encoded = encode_signed_chunks(b"hello", 5, &mut signer, &trailers);
        let text = String::from_utf8_lossy(&encoded);
        let signature = signer.trailer_signature(&trailers);
        assert!(text.contains(&format!("x-amz-checksum-crc32:sOO8/Q==\r\n{TRAILER_SIGNATURE_HEADER}:{signature}\r\n\r\n")));
        assert!(signer.verify_trailer(&trailers, &signature));

        let tampered = vec![("x-amz-checksum-crc32".to_owned(), "AAAAAA==".to_owned())];
        assert!(!signer.verify_trailer(&tampered, &signature));
    }

    #[test]
    fn test_should_encode_unsigned_chunks() {
        let encoded = encode_unsigned_chunks(
            b"hello world",
            6,
            &[("x-amz-checksum-crc32".to_owned(), "DUoRhQ==".to_owned())],
        );
        assert_eq!(
            encoded,
            b"6\r\nhello \r\n5\r\nworld\r\n0\r\nx-amz-checksum-crc32:DUoRhQ==\r\n\r\n"
        );
    }
}
