//! Payload hash modes declared through `x-amz-content-sha256`.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// Placeholder hash for an unsigned body.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// aws-chunked body with per-chunk signatures.
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
/// aws-chunked body with per-chunk signatures and a signed trailer.
pub const STREAMING_PAYLOAD_TRAILER: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD-TRAILER";
/// aws-chunked body without chunk signatures, with a trailer.
pub const STREAMING_UNSIGNED_PAYLOAD_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";

const ECDSA_STREAMING_PREFIX: &str = "STREAMING-AWS4-ECDSA-P256-SHA256-PAYLOAD";

/// The value of `x-amz-content-sha256`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSha256 {
    /// The body's SHA-256, to be checked once the body has been read.
    Digest([u8; 32]),
    /// The body is not covered by the signature.
    Unsigned,
    /// Signed aws-chunked body.
    StreamingSigned,
    /// Signed aws-chunked body followed by a signed trailer.
    StreamingSignedTrailer,
    /// Unsigned aws-chunked body followed by a trailer.
    StreamingUnsignedTrailer,
}

impl ContentSha256 {
    /// Parse a header value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] for the ECDSA streaming
    /// variants and [`AuthError::InvalidContentSha256`] for anything that is
    /// neither a known mode nor 64 hex digits.
    ///
    /// # Examples
    ///
    /// ```
    /// use s3gate_auth::payload::ContentSha256;
    ///
    /// let mode = ContentSha256::parse("STREAMING-AWS4-HMAC-SHA256-PAYLOAD").unwrap();
    /// assert!(mode.is_signed_streaming());
    /// assert!(ContentSha256::parse("abc").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        match value {
            UNSIGNED_PAYLOAD => Ok(Self::Unsigned),
            STREAMING_PAYLOAD => Ok(Self::StreamingSigned),
            STREAMING_PAYLOAD_TRAILER => Ok(Self::StreamingSignedTrailer),
            STREAMING_UNSIGNED_PAYLOAD_TRAILER => Ok(Self::StreamingUnsignedTrailer),
            v if v.starts_with(ECDSA_STREAMING_PREFIX) => {
                Err(AuthError::UnsupportedAlgorithm(v.to_owned()))
            }
            v => {
                let mut digest = [0u8; 32];
                hex::decode_to_slice(v, &mut digest)
                    .map_err(|_| AuthError::InvalidContentSha256(v.to_owned()))?;
                Ok(Self::Digest(digest))
            }
        }
    }

    /// Whether the body uses aws-chunked framing.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            Self::StreamingSigned | Self::StreamingSignedTrailer | Self::StreamingUnsignedTrailer
        )
    }

    /// Whether each chunk carries a signature.
    #[must_use]
    pub fn is_signed_streaming(&self) -> bool {
        matches!(self, Self::StreamingSigned | Self::StreamingSignedTrailer)
    }

    /// Whether a trailer follows the final chunk.
    #[must_use]
    pub fn has_trailer(&self) -> bool {
        matches!(
            self,
            Self::StreamingSignedTrailer | Self::StreamingUnsignedTrailer
        )
    }
}

impl fmt::Display for ContentSha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest(d) => f.write_str(&hex::encode(d)),
            Self::Unsigned => f.write_str(UNSIGNED_PAYLOAD),
            Self::StreamingSigned => f.write_str(STREAMING_PAYLOAD),
            Self::StreamingSignedTrailer => f.write_str(STREAMING_PAYLOAD_TRAILER),
            Self::StreamingUnsignedTrailer => f.write_str(STREAMING_UNSIGNED_PAYLOAD_TRAILER),
        }
    }
}

/// Hex SHA-256 of a payload.
///
/// # Examples
///
/// ```
/// use s3gate_auth::payload::hash_payload;
///
/// assert_eq!(
///     hash_payload(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_every_mode() {
        assert_eq!(
            ContentSha256::parse("UNSIGNED-PAYLOAD").ok(),
            Some(ContentSha256::Unsigned)
        );
        assert_eq!(
            ContentSha256::parse(STREAMING_PAYLOAD_TRAILER).ok(),
            Some(ContentSha256::StreamingSignedTrailer)
        );
        let unsigned_trailer =
            ContentSha256::parse(STREAMING_UNSIGNED_PAYLOAD_TRAILER).expect("known mode");
        assert!(unsigned_trailer.is_streaming());
        assert!(!unsigned_trailer.is_signed_streaming());
        assert!(unsigned_trailer.has_trailer());
    }

    #[test]
    fn test_should_parse_hex_digest() {
        let hash = hash_payload(b"hello");
        let mode = ContentSha256::parse(&hash).expect("hex digest");
        assert!(matches!(mode, ContentSha256::Digest(_)));
        assert_eq!(mode.to_string(), hash);
    }

    #[test]
    fn test_should_reject_ecdsa_streaming() {
        let result = ContentSha256::parse("STREAMING-AWS4-ECDSA-P256-SHA256-PAYLOAD");
        assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_should_reject_short_digest() {
        let result = ContentSha256::parse("deadbeef");
        assert!(matches!(result, Err(AuthError::InvalidContentSha256(_))));
    }
}
