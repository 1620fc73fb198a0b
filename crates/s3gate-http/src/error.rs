//! Pipeline failure taxonomy and its mapping onto S3 error responses.
//!
//! Every stage fails with a [`PipelineError`]. Its [`FailureKind`] is what
//! audit and metrics record; [`PipelineError::to_s3_error`] is what the
//! client sees. Unknown access keys, wrong scopes, and wrong signatures all
//! produce the same client-visible error.

use std::convert::Infallible;
use std::fmt;

use s3gate_auth::AuthError;
use s3gate_model::error::{S3Error, S3ErrorCode};
use serde::Serialize;

const SIGNATURE_MISMATCH_MESSAGE: &str = "The request signature we calculated does not match the \
     signature you provided. Check your key and signing method.";

/// The failure kind recorded by audit and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Unparsable URI, header, or framing.
    MalformedRequest,
    /// Request signature did not verify.
    SignatureMismatch,
    /// A chunk or trailer signature did not verify.
    ChunkSignatureMismatch,
    /// Signature timestamp too old or presigned URL expired.
    RequestExpired,
    /// Signature timestamp too far ahead.
    RequestTimeTooSkewed,
    /// Unknown or expired access key.
    CredentialNotFound,
    /// Declared digest differs from the received body.
    PayloadChecksumMismatch,
    /// ACL evaluation denied the request.
    AccessDenied,
    /// Size or frame limits exceeded.
    BodyTooLarge,
    /// The body ended early or the client went away.
    IncompleteBody,
    /// Body idle timeout or whole-request deadline.
    RequestTimeout,
    /// The target bucket or object does not exist.
    NotFound,
    /// Method or sub-resource the gateway does not route.
    Unsupported,
    /// A collaborator (identity service, backend) could not answer.
    ServiceUnavailable,
    /// Anything else.
    Internal,
}

impl FailureKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "malformed_request",
            Self::SignatureMismatch => "signature_mismatch",
            Self::ChunkSignatureMismatch => "chunk_signature_mismatch",
            Self::RequestExpired => "request_expired",
            Self::RequestTimeTooSkewed => "request_time_too_skewed",
            Self::CredentialNotFound => "credential_not_found",
            Self::PayloadChecksumMismatch => "payload_checksum_mismatch",
            Self::AccessDenied => "access_denied",
            Self::BodyTooLarge => "body_too_large",
            Self::IncompleteBody => "incomplete_body",
            Self::RequestTimeout => "request_timeout",
            Self::NotFound => "not_found",
            Self::Unsupported => "unsupported",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }

    /// Whether this kind is an authentication or authorization refusal.
    #[must_use]
    pub fn is_denial(self) -> bool {
        matches!(
            self,
            Self::SignatureMismatch
                | Self::ChunkSignatureMismatch
                | Self::RequestExpired
                | Self::RequestTimeTooSkewed
                | Self::CredentialNotFound
                | Self::AccessDenied
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the request pipeline and the body transforms.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// The request could not be decoded.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The signing parameters could not be parsed.
    #[error("malformed authorization: {0}")]
    MalformedAuthorization(String),

    /// Signature or scope did not verify. The detail is for logs only.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Chunk `index` (zero based) failed verification.
    #[error("chunk {index} signature mismatch")]
    ChunkSignatureMismatch {
        /// Index of the offending chunk.
        index: u64,
    },

    /// The trailer signature failed verification.
    #[error("trailer signature mismatch")]
    TrailerSignatureMismatch,

    /// Request older than the skew window or presigned URL expired.
    #[error("request has expired")]
    RequestExpired,

    /// Request timestamp too far ahead.
    #[error("request time too skewed")]
    RequestTimeTooSkewed,

    /// The access key is unknown. The detail is for logs only.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// A computed digest differs from the declared one.
    #[error("{header} does not match the received body")]
    PayloadChecksumMismatch {
        /// Header or trailer that declared the digest.
        header: String,
    },

    /// A declared digest is not well formed.
    #[error("invalid digest in {header}")]
    InvalidDigest {
        /// The offending header.
        header: String,
    },

    /// The ACL enforcer denied the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The body exceeds the configured or declared size.
    #[error("body too large: {0}")]
    BodyTooLarge(String),

    /// A chunk frame limit was exceeded.
    #[error("frame limit exceeded: {0}")]
    FrameLimitExceeded(String),

    /// The body ended before its framing or declared length was complete.
    #[error("incomplete body: {0}")]
    IncompleteBody(String),

    /// The body went idle or the request deadline passed.
    #[error("request timed out")]
    RequestTimeout,

    /// The bucket does not exist.
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    /// The object does not exist.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// The HTTP method is not routable.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The operation is not supported by the gateway.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The identity service or backend could not be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The failure kind recorded by audit and metrics.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedRequest(_) | Self::MalformedAuthorization(_) | Self::InvalidDigest { .. } => {
                FailureKind::MalformedRequest
            }
            Self::SignatureMismatch(_) => FailureKind::SignatureMismatch,
            Self::ChunkSignatureMismatch { .. } | Self::TrailerSignatureMismatch => {
                FailureKind::ChunkSignatureMismatch
            }
            Self::RequestExpired => FailureKind::RequestExpired,
            Self::RequestTimeTooSkewed => FailureKind::RequestTimeTooSkewed,
            Self::CredentialNotFound(_) => FailureKind::CredentialNotFound,
            Self::PayloadChecksumMismatch { .. } => FailureKind::PayloadChecksumMismatch,
            Self::AccessDenied(_) => FailureKind::AccessDenied,
            Self::BodyTooLarge(_) | Self::FrameLimitExceeded(_) => FailureKind::BodyTooLarge,
            Self::IncompleteBody(_) => FailureKind::IncompleteBody,
            Self::RequestTimeout => FailureKind::RequestTimeout,
            Self::NoSuchBucket(_) | Self::NoSuchKey(_) => FailureKind::NotFound,
            Self::MethodNotAllowed(_) | Self::NotImplemented(_) => FailureKind::Unsupported,
            Self::ServiceUnavailable(_) => FailureKind::ServiceUnavailable,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// The protocol-shaped error returned to the client.
    ///
    /// Internal detail never reaches the message of an authentication
    /// failure.
    #[must_use]
    pub fn to_s3_error(&self) -> S3Error {
        match self {
            Self::MalformedRequest(msg) => S3Error::with_message(S3ErrorCode::InvalidRequest, msg),
            Self::MalformedAuthorization(msg) => {
                S3Error::with_message(S3ErrorCode::AuthorizationHeaderMalformed, msg)
            }
            Self::SignatureMismatch(_)
            | Self::CredentialNotFound(_)
            | Self::ChunkSignatureMismatch { .. }
            | Self::TrailerSignatureMismatch => {
                S3Error::with_message(S3ErrorCode::SignatureDoesNotMatch, SIGNATURE_MISMATCH_MESSAGE)
            }
            Self::RequestExpired => {
                S3Error::with_message(S3ErrorCode::AccessDenied, "Request has expired")
            }
            Self::RequestTimeTooSkewed => S3Error::new(S3ErrorCode::RequestTimeTooSkewed),
            Self::PayloadChecksumMismatch { header } if header == "x-amz-content-sha256" => {
                S3Error::new(S3ErrorCode::XAmzContentSHA256Mismatch)
            }
            Self::PayloadChecksumMismatch { header } => S3Error::with_message(
                S3ErrorCode::BadDigest,
                format!("The {header} you specified did not match what we received."),
            ),
            Self::InvalidDigest { header } if header == "x-amz-content-sha256" => {
                S3Error::with_message(
                    S3ErrorCode::XAmzContentSHA256Mismatch,
                    "The provided 'x-amz-content-sha256' header is not valid.",
                )
            }
            Self::InvalidDigest { header } => S3Error::with_message(
                S3ErrorCode::InvalidDigest,
                format!("The {header} you specified is not valid."),
            ),
            Self::AccessDenied(_) => S3Error::new(S3ErrorCode::AccessDenied),
            Self::BodyTooLarge(_) => S3Error::new(S3ErrorCode::EntityTooLarge),
            Self::FrameLimitExceeded(_) => S3Error::new(S3ErrorCode::MaxMessageLengthExceeded),
            Self::IncompleteBody(_) => S3Error::new(S3ErrorCode::IncompleteBody),
            Self::RequestTimeout => S3Error::new(S3ErrorCode::RequestTimeout),
            Self::NoSuchBucket(bucket) => S3Error::no_such_bucket(bucket.clone()),
            Self::NoSuchKey(key) => S3Error::no_such_key(key.clone()),
            Self::MethodNotAllowed(method) => S3Error::with_message(
                S3ErrorCode::MethodNotAllowed,
                format!("The specified method is not allowed against this resource: {method}"),
            ),
            Self::NotImplemented(what) => S3Error::not_implemented(what.clone()),
            Self::ServiceUnavailable(_) => S3Error::new(S3ErrorCode::ServiceUnavailable),
            Self::Internal(_) => S3Error::new(S3ErrorCode::InternalError),
        }
    }
}

impl From<AuthError> for PipelineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedRequest(msg) => Self::MalformedRequest(msg),
            AuthError::AmbiguousAuth
            | AuthError::UnsupportedPayloadMode(_)
            | AuthError::MissingQueryParam(_)
            | AuthError::InvalidQueryParam(_) => Self::MalformedRequest(err.to_string()),
            AuthError::InvalidAuthHeader(_)
            | AuthError::UnsupportedAlgorithm(_)
            | AuthError::MissingHeader(_)
            | AuthError::HeaderNotSigned(_)
            | AuthError::InvalidCredential(_) => Self::MalformedAuthorization(err.to_string()),
            AuthError::InvalidContentSha256(_) => Self::InvalidDigest {
                header: "x-amz-content-sha256".to_owned(),
            },
            AuthError::ScopeMismatch(_) | AuthError::SignatureDoesNotMatch => {
                Self::SignatureMismatch(err.to_string())
            }
            AuthError::AccessKeyNotFound(key) => Self::CredentialNotFound(key),
            AuthError::RequestExpired => Self::RequestExpired,
            AuthError::RequestTimeTooSkewed => Self::RequestTimeTooSkewed,
            AuthError::IdentityUnavailable(msg) => Self::ServiceUnavailable(msg),
        }
    }
}

impl From<hyper::Error> for PipelineError {
    fn from(err: hyper::Error) -> Self {
        Self::IncompleteBody(err.to_string())
    }
}

impl From<Infallible> for PipelineError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<PipelineError> for S3Error {
    fn from(err: PipelineError) -> Self {
        err.to_s3_error()
    }
}
