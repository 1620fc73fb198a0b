//! Presigned URL verification for AWS Signature Version 4.
//!
//! Presigned URLs carry authentication in query parameters:
//!
//! - `X-Amz-Algorithm` - must be `AWS4-HMAC-SHA256`
//! - `X-Amz-Credential` - `AKID/date/region/service/aws4_request`
//! - `X-Amz-Date` - `YYYYMMDDTHHMMSSZ`
//! - `X-Amz-Expires` - validity in seconds
//! - `X-Amz-SignedHeaders` - semicolon-separated signed header names
//! - `X-Amz-Signature` - the hex-encoded signature
//!
//! The payload hash is always `UNSIGNED-PAYLOAD`; a presigned request can
//! never carry a signed streaming body.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::canonical::CanonicalRequest;
use crate::credentials::CredentialResolver;
use crate::error::AuthError;
use crate::payload::{ContentSha256, UNSIGNED_PAYLOAD};
use crate::sigv4::{
    ALGORITHM, CredentialScope, SignatureInput, SignatureKind, SigningPolicy, VerifiedSignature,
    parse_amz_date, parse_credential, split_signed_headers, verify_signature,
};

const SIGNATURE_PARAM: &str = "X-Amz-Signature";

/// Parsed presigned query parameters.
#[derive(Debug, Clone)]
pub struct PresignedParams {
    /// The access key ID.
    pub access_key_id: String,
    /// The credential scope.
    pub scope: CredentialScope,
    /// `X-Amz-Date` as sent.
    pub timestamp: String,
    /// `X-Amz-Date` as an instant.
    pub signed_at: DateTime<Utc>,
    /// Validity in seconds.
    pub expires: u64,
    /// Signed header names.
    pub signed_headers: Vec<String>,
    /// The hex-encoded signature.
    pub signature: String,
}

/// Whether the request carries query-string authentication.
#[must_use]
pub fn is_presigned(request: &CanonicalRequest) -> bool {
    request.has_query_param("X-Amz-Algorithm")
        || request.has_query_param("X-Amz-Credential")
        || request.has_query_param(SIGNATURE_PARAM)
}

/// Extract the presigned parameters from a decoded request.
///
/// # Errors
///
/// Returns [`AuthError::MissingQueryParam`] if a parameter is absent,
/// [`AuthError::UnsupportedAlgorithm`] for another algorithm, and
/// [`AuthError::InvalidQueryParam`] for a malformed `X-Amz-Expires` or
/// `X-Amz-Date`.
pub fn parse_presigned_params(request: &CanonicalRequest) -> Result<PresignedParams, AuthError> {
    let required = |name: &str| {
        request
            .query_param(name)
            .ok_or_else(|| AuthError::MissingQueryParam(name.to_owned()))
    };

    let algorithm = required("X-Amz-Algorithm")?;
    if algorithm != ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm(algorithm.to_owned()));
    }

    let (access_key_id, scope) = parse_credential(required("X-Amz-Credential")?)?;
    let timestamp = required("X-Amz-Date")?;
    let signed_at = parse_amz_date(timestamp)
        .map_err(|_| AuthError::InvalidQueryParam(format!("X-Amz-Date={timestamp}")))?;
    let expires_str = required("X-Amz-Expires")?;
    let expires: u64 = expires_str
        .parse()
        .map_err(|_| AuthError::InvalidQueryParam(format!("X-Amz-Expires={expires_str}")))?;
    let signed_headers = split_signed_headers(required("X-Amz-SignedHeaders")?)?;
    let signature = required(SIGNATURE_PARAM)?;

    Ok(PresignedParams {
        access_key_id,
        scope,
        timestamp: timestamp.to_owned(),
        signed_at,
        expires,
        signed_headers,
        signature: signature.to_owned(),
    })
}

/// Check a presigned validity window.
///
/// The URL is valid from `signed_at` (minus the skew allowance) up to, but
/// not including, `signed_at + expires`.
///
/// # Errors
///
/// [`AuthError::RequestTimeTooSkewed`] if signed too far in the future,
/// [`AuthError::RequestExpired`] once the window has passed.
pub fn check_expiration(
    signed_at: DateTime<Utc>,
    expires: u64,
    now: DateTime<Utc>,
    skew: std::time::Duration,
) -> Result<(), AuthError> {
    let skew = TimeDelta::from_std(skew).unwrap_or(TimeDelta::MAX);
    if signed_at - now > skew {
        return Err(AuthError::RequestTimeTooSkewed);
    }
    let lifetime = i64::try_from(expires)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| AuthError::InvalidQueryParam(format!("X-Amz-Expires={expires}")))?;
    if now >= signed_at + lifetime {
        return Err(AuthError::RequestExpired);
    }
    Ok(())
}

/// Verify a presigned request.
///
/// # Errors
///
/// Returns an [`AuthError`] if parameters are missing or malformed, the URL
/// has expired, the request declares a streaming payload, or the signature
/// does not verify.
pub async fn verify_presigned(
    request: &CanonicalRequest,
    resolver: &CredentialResolver,
    policy: &SigningPolicy,
    now: DateTime<Utc>,
) -> Result<VerifiedSignature, AuthError> {
    let params = parse_presigned_params(request)?;

    debug!(
        access_key_id = %params.access_key_id,
        scope = %params.scope,
        expires = params.expires,
        "verifying presigned request"
    );

    let max_expires = policy.max_presign_expires.as_secs();
    if params.expires == 0 || params.expires > max_expires {
        return Err(AuthError::InvalidQueryParam(format!(
            "X-Amz-Expires must be between 1 and {max_expires}"
        )));
    }

    if let Some(value) = request.header("x-amz-content-sha256") {
        if ContentSha256::parse(value)?.is_streaming() {
            return Err(AuthError::UnsupportedPayloadMode(value.to_owned()));
        }
    }

    check_expiration(params.signed_at, params.expires, now, policy.clock_skew)?;

    verify_signature(
        request,
        resolver,
        policy,
        now,
        SignatureInput {
            access_key_id: &params.access_key_id,
            scope: &params.scope,
            timestamp: &params.timestamp,
            signed_headers: &params.signed_headers,
            signature: &params.signature,
            payload_hash: UNSIGNED_PAYLOAD,
            exclude_query: Some(SIGNATURE_PARAM),
            kind: SignatureKind::Presigned,
            content_sha256: ContentSha256::Unsigned,
        },
    )
    .await
}
