//! AWS Signature Version 4 verification (header form).
//!
//! The flow for a request signed through the `Authorization` header:
//!
//! 1. Parse the header into credential scope, signed headers, and signature.
//! 2. Check the request timestamp against the clock-skew window.
//! 3. Rebuild the canonical request and the string to sign.
//! 4. Resolve the secret, derive the signing key, and compare signatures in
//!    constant time.
//!
//! Step 4 runs to completion even for unknown access keys (against a decoy
//! secret), and the unknown-key, wrong-region and wrong-signature outcomes
//! are only told apart after the comparison.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use hmac::{Hmac, KeyInit, Mac};
use s3gate_core::GatewayConfig;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::canonical::{CanonicalRequest, build_canonical_request};
use crate::chunk::ChunkSigner;
use crate::credentials::{Credential, CredentialResolver, Identity};
use crate::error::AuthError;
use crate::payload::{ContentSha256, hash_payload};

/// The only algorithm supported by this implementation.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The service every credential scope must name.
pub const SERVICE: &str = "s3";

/// `strftime` format of `x-amz-date` / `X-Amz-Date`.
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const SCOPE_TERMINATOR: &str = "aws4_request";

type HmacSha256 = Hmac<Sha256>;

/// Verification policy derived from the gateway configuration.
#[derive(Debug, Clone)]
pub struct SigningPolicy {
    /// Region every scope must name.
    pub region: String,
    /// Allowed distance between a signature timestamp and now.
    pub clock_skew: Duration,
    /// Largest accepted `X-Amz-Expires`.
    pub max_presign_expires: Duration,
    /// Log canonical requests and strings to sign at `info`.
    pub debug: bool,
}

impl SigningPolicy {
    /// Policy for `region` with a 15 minute skew window and 7 day presign limit.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            clock_skew: Duration::from_secs(900),
            max_presign_expires: Duration::from_secs(604_800),
            debug: false,
        }
    }

    /// Policy taken from the gateway configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            region: config.region.clone(),
            clock_skew: config.clock_skew(),
            max_presign_expires: Duration::from_secs(config.max_presign_expires_secs),
            debug: config.debug,
        }
    }
}

/// The `date/region/service/aws4_request` part of a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    /// `YYYYMMDD`.
    pub date: String,
    /// Region the client signed for.
    pub region: String,
    /// Service the client signed for.
    pub service: String,
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{SCOPE_TERMINATOR}",
            self.date, self.region, self.service
        )
    }
}

/// Split `AKID/date/region/service/aws4_request` into key id and scope.
///
/// # Errors
///
/// Returns [`AuthError::InvalidCredential`] if the shape is wrong.
pub fn parse_credential(credential: &str) -> Result<(String, CredentialScope), AuthError> {
    let parts: Vec<&str> = credential.split('/').collect();
    let [access_key_id, date, region, service, terminator] = parts.as_slice() else {
        return Err(AuthError::InvalidCredential(credential.to_owned()));
    };
    if access_key_id.is_empty()
        || *terminator != SCOPE_TERMINATOR
        || date.len() != 8
        || !date.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(AuthError::InvalidCredential(credential.to_owned()));
    }
    Ok((
        (*access_key_id).to_owned(),
        CredentialScope {
            date: (*date).to_owned(),
            region: (*region).to_owned(),
            service: (*service).to_owned(),
        },
    ))
}

/// Parsed components of an `Authorization` header.
#[derive(Debug, Clone)]
pub struct ParsedAuth {
    /// The access key ID.
    pub access_key_id: String,
    /// The credential scope.
    pub scope: CredentialScope,
    /// Signed header names, lower-case.
    pub signed_headers: Vec<String>,
    /// The hex-encoded signature.
    pub signature: String,
}

/// Parse an `Authorization` header value.
///
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20130524/us-east-1/s3/aws4_request,
///   SignedHeaders=host;x-amz-content-sha256;x-amz-date,
///   Signature=<hex-signature>
/// ```
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for anything but
/// `AWS4-HMAC-SHA256` and [`AuthError::InvalidAuthHeader`] for a missing
/// component.
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuth, AuthError> {
    let (algorithm, rest) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| AuthError::InvalidAuthHeader("missing algorithm".to_owned()))?;

    if algorithm != ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm(algorithm.to_owned()));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("Credential=") {
            credential = Some(value);
        } else if let Some(value) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(value);
        } else if let Some(value) = part.strip_prefix("Signature=") {
            signature = Some(value);
        }
    }

    let credential =
        credential.ok_or_else(|| AuthError::InvalidAuthHeader("missing Credential".to_owned()))?;
    let signed_headers = signed_headers
        .ok_or_else(|| AuthError::InvalidAuthHeader("missing SignedHeaders".to_owned()))?;
    let signature =
        signature.ok_or_else(|| AuthError::InvalidAuthHeader("missing Signature".to_owned()))?;

    let (access_key_id, scope) = parse_credential(credential)?;

    Ok(ParsedAuth {
        access_key_id,
        scope,
        signed_headers: split_signed_headers(signed_headers)?,
        signature: signature.to_owned(),
    })
}

/// Split a `SignedHeaders` value.
pub(crate) fn split_signed_headers(value: &str) -> Result<Vec<String>, AuthError> {
    let names: Vec<String> = value
        .split(';')
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if names.is_empty() {
        return Err(AuthError::InvalidAuthHeader("empty SignedHeaders".to_owned()));
    }
    Ok(names)
}

/// Build the SigV4 string to sign.
///
/// # Examples
///
/// ```
/// use s3gate_auth::sigv4::build_string_to_sign;
///
/// let sts = build_string_to_sign(
///     "20130524T000000Z",
///     "20130524/us-east-1/s3/aws4_request",
///     "7344ae5b7ee6c3e7e6b0fe0640412a37625d1fbfff95c48bbb2dc43964946972",
/// );
/// assert!(sts.starts_with("AWS4-HMAC-SHA256\n20130524T000000Z\n"));
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// A derived SigV4 signing key. Its `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(***)")
    }
}

/// Derive the SigV4 signing key.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> SigningKey {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    SigningKey(hmac_sha256(
        &date_region_service_key,
        SCOPE_TERMINATOR.as_bytes(),
    ))
}

/// Hex HMAC-SHA256 of `data` under `signing_key`.
#[must_use]
pub fn compute_signature(signing_key: &SigningKey, data: &str) -> String {
    hex::encode(hmac_sha256(signing_key.as_bytes(), data.as_bytes()))
}

/// Constant-time comparison of two hex signatures.
#[must_use]
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Parse an `x-amz-date` style timestamp.
///
/// # Errors
///
/// Returns [`AuthError::MalformedRequest`] if the value is not
/// `YYYYMMDDTHHMMSSZ`.
pub fn parse_amz_date(value: &str) -> Result<DateTime<Utc>, AuthError> {
    NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| AuthError::MalformedRequest(format!("invalid timestamp: {value}")))
}

/// Reject timestamps outside `now ± skew`.
///
/// # Errors
///
/// [`AuthError::RequestExpired`] when too old,
/// [`AuthError::RequestTimeTooSkewed`] when too far ahead.
pub fn check_clock_skew(
    signed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<(), AuthError> {
    let skew = TimeDelta::from_std(skew).unwrap_or(TimeDelta::MAX);
    if now - signed_at > skew {
        return Err(AuthError::RequestExpired);
    }
    if signed_at - now > skew {
        return Err(AuthError::RequestTimeTooSkewed);
    }
    Ok(())
}

/// How a request was signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// `Authorization` header over a fully hashed or unsigned body.
    Header,
    /// Query-string signature.
    Presigned,
    /// `Authorization` header whose signature seeds a chunk signature chain.
    ChunkedSeed,
}

/// Everything that went into a request signature.
#[derive(Debug, Clone)]
pub struct SignatureContext {
    /// Always [`ALGORITHM`].
    pub algorithm: &'static str,
    /// The client's credential scope.
    pub scope: CredentialScope,
    /// `YYYYMMDDTHHMMSSZ` used in the string to sign.
    pub timestamp: String,
    /// The string to sign.
    pub string_to_sign: String,
    /// The signature the client supplied.
    pub signature: String,
    /// How the request was signed.
    pub kind: SignatureKind,
}

/// A successfully verified request signature.
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    /// The credential that signed the request.
    pub credential: Credential,
    /// Signature inputs.
    pub context: SignatureContext,
    /// Key derived for the scope; seeds chunk verification.
    pub signing_key: SigningKey,
    /// The declared payload mode.
    pub content_sha256: ContentSha256,
}

impl VerifiedSignature {
    /// The identity the request acts as.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::from(&self.credential)
    }

    /// A chunk signer seeded by this signature.
    #[must_use]
    pub fn chunk_signer(&self) -> ChunkSigner {
        ChunkSigner::new(
            self.signing_key.clone(),
            &self.context.timestamp,
            &self.context.scope,
            &self.context.signature,
        )
    }
}

/// Inputs shared by the header and presigned verifiers.
pub(crate) struct SignatureInput<'a> {
    pub(crate) access_key_id: &'a str,
    pub(crate) scope: &'a CredentialScope,
    pub(crate) timestamp: &'a str,
    pub(crate) signed_headers: &'a [String],
    pub(crate) signature: &'a str,
    pub(crate) payload_hash: &'a str,
    pub(crate) exclude_query: Option<&'a str>,
    pub(crate) kind: SignatureKind,
    pub(crate) content_sha256: ContentSha256,
}

/// Verify a request signed through the `Authorization` header.
///
/// # Errors
///
/// Returns an [`AuthError`] if the header is malformed, a required header is
/// missing or unsigned, the timestamp is outside the skew window, or the
/// signature does not verify.
pub async fn verify_sigv4(
    request: &CanonicalRequest,
    resolver: &CredentialResolver,
    policy: &SigningPolicy,
    now: DateTime<Utc>,
) -> Result<VerifiedSignature, AuthError> {
    let header = request
        .header("authorization")
        .ok_or_else(|| AuthError::InvalidAuthHeader("missing Authorization header".to_owned()))?;
    let parsed = parse_authorization_header(header)?;

    let payload_hash = request
        .header("x-amz-content-sha256")
        .ok_or_else(|| AuthError::MissingHeader("x-amz-content-sha256".to_owned()))?;
    let content_sha256 = ContentSha256::parse(payload_hash)?;

    let (timestamp, signed_at) = request_timestamp(request, &parsed.signed_headers)?;
    check_clock_skew(signed_at, now, policy.clock_skew)?;

    let kind = if content_sha256.is_signed_streaming() {
        SignatureKind::ChunkedSeed
    } else {
        SignatureKind::Header
    };

    verify_signature(
        request,
        resolver,
        policy,
        now,
        SignatureInput {
            access_key_id: &parsed.access_key_id,
            scope: &parsed.scope,
            timestamp: &timestamp,
            signed_headers: &parsed.signed_headers,
            signature: &parsed.signature,
            payload_hash,
            exclude_query: None,
            kind,
            content_sha256,
        },
    )
    .await
}

/// Outcome of [`authenticate`].
#[derive(Debug, Clone)]
pub enum Authentication {
    /// The request carries no signature at all.
    Anonymous,
    /// The request was signed and the signature verified.
    Signed(Box<VerifiedSignature>),
}

/// Authenticate a request through whichever signing form it carries.
///
/// A request with neither an `Authorization` header nor presign parameters
/// is anonymous. Carrying both is rejected.
///
/// # Errors
///
/// Returns [`AuthError::AmbiguousAuth`] for a request signed both ways, and
/// any error of [`verify_sigv4`] or [`crate::presigned::verify_presigned`].
pub async fn authenticate(
    request: &CanonicalRequest,
    resolver: &CredentialResolver,
    policy: &SigningPolicy,
    now: DateTime<Utc>,
) -> Result<Authentication, AuthError> {
    let has_header = request.header("authorization").is_some();
    let has_query = crate::presigned::is_presigned(request);
    let verified = match (has_header, has_query) {
        (false, false) => return Ok(Authentication::Anonymous),
        (true, true) => return Err(AuthError::AmbiguousAuth),
        (true, false) => verify_sigv4(request, resolver, policy, now).await?,
        (false, true) => crate::presigned::verify_presigned(request, resolver, policy, now).await?,
    };
    Ok(Authentication::Signed(Box::new(verified)))
}

/// Pick the request timestamp from `x-amz-date`, falling back to `date`.
///
/// The chosen header must be signed. Returns the timestamp in
/// [`AMZ_DATE_FORMAT`] and as an instant.
fn request_timestamp(
    request: &CanonicalRequest,
    signed_headers: &[String],
) -> Result<(String, DateTime<Utc>), AuthError> {
    if let Some(value) = request.header("x-amz-date") {
        require_signed(signed_headers, "x-amz-date")?;
        return Ok((value.to_owned(), parse_amz_date(value)?));
    }
    if let Some(value) = request.header("date") {
        require_signed(signed_headers, "date")?;
        let signed_at = DateTime::parse_from_rfc2822(value)
            .map_err(|_| AuthError::MalformedRequest(format!("invalid Date header: {value}")))?
            .with_timezone(&Utc);
        return Ok((signed_at.format(AMZ_DATE_FORMAT).to_string(), signed_at));
    }
    Err(AuthError::MissingHeader("x-amz-date".to_owned()))
}

pub(crate) fn require_signed(signed_headers: &[String], name: &str) -> Result<(), AuthError> {
    if signed_headers.iter().any(|h| h == name) {
        Ok(())
    } else {
        Err(AuthError::HeaderNotSigned(name.to_owned()))
    }
}

/// Rebuild and compare the signature described by `input`.
pub(crate) async fn verify_signature(
    request: &CanonicalRequest,
    resolver: &CredentialResolver,
    policy: &SigningPolicy,
    now: DateTime<Utc>,
    input: SignatureInput<'_>,
) -> Result<VerifiedSignature, AuthError> {
    require_signed(input.signed_headers, "host")?;
    if !input.timestamp.starts_with(&input.scope.date) {
        return Err(AuthError::InvalidCredential(format!(
            "scope date {} does not match request date {}",
            input.scope.date, input.timestamp
        )));
    }

    let canonical_request = build_canonical_request(
        request,
        input.signed_headers,
        input.payload_hash,
        input.exclude_query,
    )?;
    let scope = input.scope.to_string();
    let string_to_sign = build_string_to_sign(
        input.timestamp,
        &scope,
        &hash_payload(canonical_request.as_bytes()),
    );

    if policy.debug {
        info!(%canonical_request, %string_to_sign, "signing diagnostics");
    } else {
        debug!(%canonical_request, %string_to_sign, "built string to sign");
    }

    let resolution = resolver
        .resolve_for_signing(input.access_key_id, now)
        .await?;
    let signing_key = derive_signing_key(
        resolution.secret.expose(),
        &input.scope.date,
        &input.scope.region,
        &input.scope.service,
    );
    let expected = compute_signature(&signing_key, &string_to_sign);
    let matched = signatures_match(&expected, input.signature);

    let Some(credential) = resolution.credential else {
        return Err(AuthError::AccessKeyNotFound(input.access_key_id.to_owned()));
    };
    if input.scope.region != policy.region || input.scope.service != SERVICE {
        return Err(AuthError::ScopeMismatch(scope));
    }
    if !matched {
        debug!(access_key_id = input.access_key_id, "signature mismatch");
        return Err(AuthError::SignatureDoesNotMatch);
    }

    debug!(access_key_id = input.access_key_id, kind = ?input.kind, "signature verified");
    Ok(VerifiedSignature {
        credential,
        context: SignatureContext {
            algorithm: ALGORITHM,
            scope: input.scope.clone(),
            timestamp: input.timestamp.to_owned(),
            string_to_sign,
            signature: input.signature.to_owned(),
            kind: input.kind,
        },
        signing_key,
        content_sha256: input.content_sha256,
    })
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
