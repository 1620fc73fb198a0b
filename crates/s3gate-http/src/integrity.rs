//! Payload integrity verification.
//!
//! [`ExpectedChecksums`] collects every digest a request declares, up front
//! in headers or deferred to a trailer. [`IntegrityBody`] hashes the body as
//! it streams through and, at end of stream, replaces the terminating `None`
//! with an error when any declared digest disagrees. A consumer therefore
//! never observes a clean end of body for a payload that failed its checks.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use s3gate_auth::ContentSha256;
use tracing::{debug, warn};

use crate::checksums::{ChecksumAlgorithm, StreamingHasher, decode_base64_digest};
use crate::error::PipelineError;

const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
const CONTENT_MD5_HEADER: &str = "Content-MD5";
const TRAILER_HEADER: &str = "x-amz-trailer";

/// Where an expected digest was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSource {
    /// `x-amz-content-sha256` carrying a hex digest.
    ContentSha256,
    /// `Content-MD5`.
    ContentMd5,
    /// An `x-amz-checksum-*` request header.
    Header,
}

/// A digest declared before the body was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedChecksum {
    /// Digest algorithm.
    pub algorithm: ChecksumAlgorithm,
    /// Raw digest bytes.
    pub expected: Vec<u8>,
    /// Declaring header, used in error responses.
    pub header: String,
    /// How the digest was declared.
    pub source: ChecksumSource,
}

/// Every digest a request asks the gateway to verify.
#[derive(Debug, Clone, Default)]
pub struct ExpectedChecksums {
    declared: Vec<ExpectedChecksum>,
    trailer: Option<ChecksumAlgorithm>,
}

impl ExpectedChecksums {
    /// Collect declared digests from request headers.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidDigest`] when a digest header does not decode
    /// to the algorithm's length, and [`PipelineError::MalformedRequest`] for
    /// an `x-amz-trailer` the payload mode cannot carry.
    pub fn from_headers(
        headers: &HeaderMap,
        content_sha256: &ContentSha256,
    ) -> Result<Self, PipelineError> {
        let mut declared = Vec::new();

        if let ContentSha256::Digest(digest) = content_sha256 {
            declared.push(ExpectedChecksum {
                algorithm: ChecksumAlgorithm::Sha256,
                expected: digest.to_vec(),
                header: CONTENT_SHA256_HEADER.to_owned(),
                source: ChecksumSource::ContentSha256,
            });
        }

        if let Some(value) = headers.get("content-md5") {
            let expected = value
                .to_str()
                .ok()
                .and_then(|v| decode_base64_digest(ChecksumAlgorithm::Md5, v))
                .ok_or_else(|| PipelineError::InvalidDigest {
                    header: CONTENT_MD5_HEADER.to_owned(),
                })?;
            declared.push(ExpectedChecksum {
                algorithm: ChecksumAlgorithm::Md5,
                expected,
                header: CONTENT_MD5_HEADER.to_owned(),
                source: ChecksumSource::ContentMd5,
            });
        }

        for algorithm in ChecksumAlgorithm::ADDITIONAL {
            let Some(name) = algorithm.header_name() else {
                continue;
            };
            let Some(value) = headers.get(name) else {
                continue;
            };
            let expected = value
                .to_str()
                .ok()
                .and_then(|v| decode_base64_digest(algorithm, v))
                .ok_or_else(|| PipelineError::InvalidDigest {
                    header: name.to_owned(),
                })?;
            declared.push(ExpectedChecksum {
                algorithm,
                expected,
                header: name.to_owned(),
                source: ChecksumSource::Header,
            });
        }

        let trailer = match headers.get(TRAILER_HEADER) {
            None => None,
            Some(value) => {
                if !content_sha256.has_trailer() {
                    return Err(PipelineError::MalformedRequest(format!(
                        "{TRAILER_HEADER} requires a trailer payload mode, got {content_sha256}"
                    )));
                }
                let name = value.to_str().map_err(|_| {
                    PipelineError::MalformedRequest(format!("invalid {TRAILER_HEADER}"))
                })?;
                let algorithm =
                    ChecksumAlgorithm::from_header_name(name.trim()).ok_or_else(|| {
                        PipelineError::MalformedRequest(format!(
                            "unsupported trailer '{}'",
                            name.trim()
                        ))
                    })?;
                Some(algorithm)
            }
        };

        Ok(Self { declared, trailer })
    }

    /// Whether nothing needs verifying.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty() && self.trailer.is_none()
    }

    /// Digests declared in headers.
    #[must_use]
    pub fn declared(&self) -> &[ExpectedChecksum] {
        &self.declared
    }

    /// Algorithm whose digest arrives in the trailer.
    #[must_use]
    pub fn trailer(&self) -> Option<ChecksumAlgorithm> {
        self.trailer
    }

    fn algorithms(&self) -> Vec<ChecksumAlgorithm> {
        self.declared
            .iter()
            .map(|c| c.algorithm)
            .chain(self.trailer)
            .collect()
    }
}

pin_project! {
    /// A body that verifies declared digests as it is consumed.
    pub struct IntegrityBody<B> {
        #[pin]
        inner: B,
        hasher: Option<StreamingHasher>,
        expected: ExpectedChecksums,
        trailer_value: Option<String>,
        finished: bool,
    }
}

impl<B> fmt::Debug for IntegrityBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityBody")
            .field("expected", &self.expected)
            .field("hasher", &self.hasher)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<B> IntegrityBody<B> {
    /// Verify `inner` against `expected`.
    pub fn new(inner: B, expected: ExpectedChecksums) -> Self {
        let hasher = StreamingHasher::new(&expected.algorithms());
        Self {
            inner,
            hasher: Some(hasher),
            expected,
            trailer_value: None,
            finished: false,
        }
    }
}

fn verify(
    hasher: StreamingHasher,
    expected: &ExpectedChecksums,
    trailer_value: Option<&str>,
) -> Result<(), PipelineError> {
    let bytes = hasher.bytes_hashed();
    let computed = hasher.finish();
    let digest_for = |algorithm: ChecksumAlgorithm| {
        computed
            .iter()
            .find(|c| c.algorithm == algorithm)
            .map(|c| c.digest.as_slice())
    };

    for declared in &expected.declared {
        if digest_for(declared.algorithm) != Some(declared.expected.as_slice()) {
            warn!(header = %declared.header, bytes, "payload checksum mismatch");
            return Err(PipelineError::PayloadChecksumMismatch {
                header: declared.header.clone(),
            });
        }
    }

    if let Some(algorithm) = expected.trailer {
        let header = algorithm.header_name().unwrap_or_default();
        let value = trailer_value.ok_or_else(|| {
            PipelineError::IncompleteBody(format!("declared trailer {header} was not sent"))
        })?;
        let provided = decode_base64_digest(algorithm, value).ok_or_else(|| {
            PipelineError::InvalidDigest {
                header: header.to_owned(),
            }
        })?;
        if digest_for(algorithm) != Some(provided.as_slice()) {
            warn!(header, bytes, "trailer checksum mismatch");
            return Err(PipelineError::PayloadChecksumMismatch {
                header: header.to_owned(),
            });
        }
    }

    debug!(bytes, "payload integrity verified");
    Ok(())
}

impl<B> Body for IntegrityBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<PipelineError>,
{
    type Data = Bytes;
    type Error = PipelineError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    if let Some(hasher) = this.hasher.as_mut() {
                        hasher.update(data);
                    }
                } else if let Some(trailers) = frame.trailers_ref() {
                    if let Some(name) = this.expected.trailer.and_then(|a| a.header_name()) {
                        *this.trailer_value = trailers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                *this.finished = true;
                Poll::Ready(Some(Err(err.into())))
            }
            None => {
                *this.finished = true;
                let Some(hasher) = this.hasher.take() else {
                    return Poll::Ready(None);
                };
                match verify(hasher, this.expected, this.trailer_value.as_deref()) {
                    Ok(()) => Poll::Ready(None),
                    Err(err) => Poll::Ready(Some(Err(err))),
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use http_body_util::BodyExt;
    use s3gate_auth::chunk::encode_unsigned_chunks;
    use s3gate_auth::hash_payload;

    use super::*;
    use crate::chunked::{AwsChunkedBody, ChunkedOptions};
    use crate::testing::{body_from_pieces, test_config};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    async fn consume(
        data: &'static [u8],
        headers: &HeaderMap,
        mode: &ContentSha256,
    ) -> Result<Bytes, PipelineError> {
        let expected = ExpectedChecksums::from_headers(headers, mode)?;
        let body = IntegrityBody::new(body_from_pieces(data, 4), expected);
        Ok(body.collect().await?.to_bytes())
    }

    #[tokio::test]
    async fn test_should_accept_matching_digests() {
        let headers = headers(&[
            ("content-md5", "XrY7u+Ae7tCTyyK7j1rNww=="),
            ("x-amz-checksum-crc32", "DUoRhQ=="),
            ("x-amz-checksum-crc32c", "yZRlqg=="),
        ]);
        let mode = ContentSha256::parse(&hash_payload(b"hello world")).expect("digest");
        let body = consume(b"hello world", &headers, &mode).await.expect("verified");
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_should_fail_at_end_of_stream_on_crc_mismatch() {
        let headers = headers(&[("x-amz-checksum-crc32", "DUoRhQ==")]);
        let err = consume(b"hello worle", &headers, &ContentSha256::Unsigned)
            .await
            .expect_err("mismatch");
        assert!(matches!(
            err,
            PipelineError::PayloadChecksumMismatch { ref header } if header == "x-amz-checksum-crc32"
        ));
    }

    #[tokio::test]
    async fn test_should_report_content_sha256_mismatch() {
        let mode = ContentSha256::parse(&hash_payload(b"other")).expect("digest");
        let err = consume(b"hello world", &HeaderMap::new(), &mode)
            .await
            .expect_err("mismatch");
        assert!(matches!(
            err,
            PipelineError::PayloadChecksumMismatch { ref header } if header == "x-amz-content-sha256"
        ));
    }

    #[test]
    fn test_should_reject_malformed_content_md5() {
        let err = ExpectedChecksums::from_headers(
            &headers(&[("content-md5", "not-base64!")]),
            &ContentSha256::Unsigned,
        )
        .expect_err("invalid");
        assert!(matches!(err, PipelineError::InvalidDigest { .. }));
    }

    #[test]
    fn test_should_reject_trailer_outside_trailer_mode() {
        let err = ExpectedChecksums::from_headers(
            &headers(&[("x-amz-trailer", "x-amz-checksum-crc32")]),
            &ContentSha256::StreamingSigned,
        )
        .expect_err("no trailer mode");
        assert!(matches!(err, PipelineError::MalformedRequest(_)));
    }

    #[test]
    fn test_should_treat_unsigned_payload_without_headers_as_empty() {
        let expected =
            ExpectedChecksums::from_headers(&HeaderMap::new(), &ContentSha256::Unsigned)
                .expect("no digests");
        assert!(expected.is_empty());
    }

    async fn chunked_with_trailer(
        payload: &[u8],
        trailer_value: Option<&str>,
    ) -> Result<Bytes, PipelineError> {
        let trailers: Vec<(String, String)> = trailer_value
            .map(|v| vec![("x-amz-checksum-crc32".to_owned(), v.to_owned())])
            .unwrap_or_default();
        let encoded = encode_unsigned_chunks(payload, 3, &trailers);
        let expected = ExpectedChecksums::from_headers(
            &headers(&[("x-amz-trailer", "x-amz-checksum-crc32")]),
            &ContentSha256::StreamingUnsignedTrailer,
        )?;
        let options = ChunkedOptions::from_config(&test_config())
            .with_trailer(true)
            .with_decoded_length(payload.len() as u64);
        let decoded = AwsChunkedBody::new(body_from_pieces(&encoded, 5), options);
        Ok(IntegrityBody::new(decoded, expected).collect().await?.to_bytes())
    }

    #[tokio::test]
    async fn test_should_verify_checksum_trailer() {
        let body = chunked_with_trailer(b"hello world", Some("DUoRhQ=="))
            .await
            .expect("trailer matches");
        assert_eq!(body, Bytes::from_static(b"hello world"));

        let err = chunked_with_trailer(b"hello world", Some("AAAAAA=="))
            .await
            .expect_err("trailer mismatch");
        assert!(matches!(err, PipelineError::PayloadChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_should_fail_when_declared_trailer_is_missing() {
        let err = chunked_with_trailer(b"hello world", None)
            .await
            .expect_err("missing trailer");
        assert!(matches!(err, PipelineError::IncompleteBody(_)));
    }
}
