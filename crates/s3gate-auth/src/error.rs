//! Error types for request decoding and SigV4 authentication.
//!
//! Every failure of the authentication half of the pipeline is an
//! [`AuthError`]. Callers decide how each variant is surfaced; several
//! variants intentionally collapse into one client-visible response.

/// Errors that can occur while decoding or authenticating a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request URI or a header could not be decoded.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The `Authorization` header could not be parsed.
    #[error("invalid Authorization header: {0}")]
    InvalidAuthHeader(String),

    /// The request carries both header and query-string signatures.
    #[error("only one authentication mechanism may be used per request")]
    AmbiguousAuth,

    /// The signing algorithm is not supported (only AWS4-HMAC-SHA256 is supported).
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A header required for signing is missing.
    #[error("missing required header: {0}")]
    MissingHeader(String),

    /// A header that must be covered by the signature is not in `SignedHeaders`.
    #[error("header must be signed: {0}")]
    HeaderNotSigned(String),

    /// The `Credential` component does not match
    /// `AKID/date/region/service/aws4_request`.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The credential scope names a region or service this gateway does not serve.
    #[error("credential scope mismatch: {0}")]
    ScopeMismatch(String),

    /// The access key ID is unknown or its credential has expired.
    #[error("access key not found: {0}")]
    AccessKeyNotFound(String),

    /// The computed signature does not match the provided signature.
    #[error("signature does not match")]
    SignatureDoesNotMatch,

    /// The request is older than the skew window or past its presigned expiry.
    #[error("request has expired")]
    RequestExpired,

    /// The request timestamp is too far in the future.
    #[error("request time too skewed")]
    RequestTimeTooSkewed,

    /// A required presigned query parameter is missing.
    #[error("missing required query parameter: {0}")]
    MissingQueryParam(String),

    /// A presigned query parameter has an invalid value.
    #[error("invalid query parameter: {0}")]
    InvalidQueryParam(String),

    /// The `x-amz-content-sha256` value is neither a digest nor a known mode.
    #[error("invalid x-amz-content-sha256: {0}")]
    InvalidContentSha256(String),

    /// The payload mode is not allowed with this authentication mechanism.
    #[error("payload mode not allowed: {0}")]
    UnsupportedPayloadMode(String),

    /// The identity service could not be reached.
    #[error("identity service unavailable: {0}")]
    IdentityUnavailable(String),
}
