//! The ordered request pipeline.
//!
//! Each stage consumes the previous stage's output type and produces the
//! next one:
//!
//! ```text
//! Request<B> --decode--> DecodedRequest --authenticate--> AuthenticatedRequest
//!   --stream--> StreamingRequest --check_integrity--> IntegrityCheckedRequest
//!   --authorize--> AuthorizedRequest --dispatch--> handler
//! ```
//!
//! The stage types have private fields and no public constructors, so the
//! only way to obtain an [`AuthorizedRequest`] is to run every stage in
//! order. Body verification is lazy: the chunk decoder and the integrity
//! checker are installed as body transforms, and the handler observes their
//! failures as errors from the body it reads.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_LENGTH, HeaderValue};
use http::request::Parts;
use http::Request;
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use s3gate_auth::credentials::CachingIdentityService;
use s3gate_auth::{
    Authentication, CanonicalRequest, ContentSha256, CredentialResolver, Identity,
    IdentityService, SigningPolicy, VerifiedSignature,
};
use s3gate_core::GatewayConfig;
use tracing::{debug, info};

use crate::acl::AclEnforcer;
use crate::backend::Backend;
use crate::body::{RequestBody, into_request_body};
use crate::chunked::{AwsChunkedBody, ChunkedOptions, strip_aws_chunked_encoding};
use crate::dispatch::DispatchContext;
use crate::error::PipelineError;
use crate::integrity::{ExpectedChecksums, IntegrityBody};
use crate::metrics::{MetricsSink, NoopMetrics, Stage};
use crate::router::{RoutingContext, S3Router};
use crate::timeout::IdleTimeoutBody;

const DECODED_LENGTH_HEADER: &str = "x-amz-decoded-content-length";

/// A request whose URI and headers decoded and whose action is known.
#[derive(Debug)]
pub struct DecodedRequest {
    request_id: String,
    parts: Parts,
    body: RequestBody,
    canonical: CanonicalRequest,
    routing: RoutingContext,
}

impl DecodedRequest {
    /// The canonical view of the request.
    #[must_use]
    pub fn canonical(&self) -> &CanonicalRequest {
        &self.canonical
    }

    /// Bucket, key, and action.
    #[must_use]
    pub fn routing(&self) -> &RoutingContext {
        &self.routing
    }
}

/// A request whose signature verified, or that carries none.
#[derive(Debug)]
pub struct AuthenticatedRequest {
    request_id: String,
    parts: Parts,
    body: RequestBody,
    routing: RoutingContext,
    identity: Identity,
    content_sha256: ContentSha256,
    signature: Option<Box<VerifiedSignature>>,
}

impl AuthenticatedRequest {
    /// Who the request acts as.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The declared payload mode.
    #[must_use]
    pub fn content_sha256(&self) -> ContentSha256 {
        self.content_sha256
    }
}

/// A request whose body, if chunked, is now decoded chunk by chunk.
#[derive(Debug)]
pub struct StreamingRequest {
    request_id: String,
    parts: Parts,
    body: RequestBody,
    routing: RoutingContext,
    identity: Identity,
    content_sha256: ContentSha256,
}

/// A request whose body verifies every declared digest as it is read.
#[derive(Debug)]
pub struct IntegrityCheckedRequest {
    request_id: String,
    parts: Parts,
    body: RequestBody,
    routing: RoutingContext,
    identity: Identity,
}

/// A request the ACL enforcer allowed. Only this type can be dispatched.
#[derive(Debug)]
pub struct AuthorizedRequest {
    request: Request<RequestBody>,
    ctx: DispatchContext,
}

impl AuthorizedRequest {
    /// What the pipeline learned about the request.
    #[must_use]
    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    /// Split into the verified request and its context.
    #[must_use]
    pub fn into_parts(self) -> (Request<RequestBody>, DispatchContext) {
        (self.request, self.ctx)
    }
}

/// What the pipeline knew about a request when it stopped, for audit.
#[derive(Debug, Clone, Default)]
pub struct RequestTrace {
    /// Set once routing succeeded.
    pub routing: Option<RoutingContext>,
    /// Set once authentication succeeded.
    pub identity: Option<Identity>,
}

/// The five verification stages, wired to their collaborators.
pub struct Pipeline {
    config: Arc<GatewayConfig>,
    policy: SigningPolicy,
    resolver: CredentialResolver,
    router: S3Router,
    enforcer: AclEnforcer,
    metrics: Arc<dyn MetricsSink>,
    clock: fn() -> DateTime<Utc>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("policy", &self.policy)
            .field("resolver", &self.resolver)
            .field("router", &self.router)
            .field("enforcer", &self.enforcer)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build the pipeline from configuration and its external services.
    ///
    /// Identity lookups go through a cache when
    /// `credential_cache_ttl_secs` is non-zero.
    pub fn new(
        config: Arc<GatewayConfig>,
        identities: Arc<dyn IdentityService>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let ttl = config.credential_cache_ttl();
        let identities: Arc<dyn IdentityService> = if ttl.is_zero() {
            identities
        } else {
            Arc::new(CachingIdentityService::new(identities, ttl))
        };

        let mut resolver = CredentialResolver::new(Arc::clone(&identities));
        if let (Some(access_key), Some(secret_key)) =
            (&config.root_access_key, &config.root_secret_key)
        {
            resolver = resolver.with_root(access_key.clone(), secret_key.clone());
        }

        Self {
            policy: SigningPolicy::from_config(&config),
            router: S3Router::new(config.domain.clone(), config.virtual_hosting),
            enforcer: AclEnforcer::new(backend, identities, &config),
            resolver,
            metrics: Arc::new(NoopMetrics),
            clock: Utc::now,
            config,
        }
    }

    /// Report stage outcomes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use `clock` as the verification time source.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// The gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The metrics sink.
    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// The ACL enforcer, for cache invalidation after ACL changes.
    #[must_use]
    pub fn enforcer(&self) -> &AclEnforcer {
        &self.enforcer
    }

    /// Run every stage in order.
    ///
    /// `trace` is filled in as stages succeed, so a caller can audit a
    /// failure with whatever was known at that point.
    ///
    /// # Errors
    ///
    /// The first stage failure, unchanged.
    pub async fn process<B>(
        &self,
        request: Request<B>,
        request_id: &str,
        trace: &mut RequestTrace,
    ) -> Result<AuthorizedRequest, PipelineError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<PipelineError>,
    {
        let decoded = self.observe(Stage::Decode, self.decode(request, request_id))?;
        trace.routing = Some(decoded.routing.clone());

        let authenticated = self.observe(Stage::Authenticate, self.authenticate(decoded).await)?;
        trace.identity = Some(authenticated.identity.clone());

        let streaming = self.observe(Stage::Stream, self.stream(authenticated))?;
        let checked = self.observe(Stage::Integrity, self.check_integrity(streaming))?;
        self.observe(Stage::Authorize, self.authorize(checked).await)
    }

    fn observe<T>(&self, stage: Stage, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
        self.metrics
            .record_stage(stage, result.as_ref().map(|_| ()).map_err(PipelineError::kind));
        result
    }

    /// Decode the URI and headers and resolve the action.
    ///
    /// The body is wrapped with the idle-read timeout here, so every later
    /// transform inherits it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MalformedRequest`] for undecodable input, and the
    /// router's errors for unroutable requests.
    pub fn decode<B>(
        &self,
        request: Request<B>,
        request_id: &str,
    ) -> Result<DecodedRequest, PipelineError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<PipelineError>,
    {
        let (parts, body) = request.into_parts();
        let canonical = CanonicalRequest::from_parts(&parts)?;
        let routing = self.router.resolve(&canonical)?;

        let idle = self.config.body_idle_timeout();
        let body = if idle.is_zero() {
            into_request_body(body)
        } else {
            into_request_body(IdleTimeoutBody::new(body, idle))
        };

        debug!(request_id, action = %routing.action, "request decoded");
        Ok(DecodedRequest {
            request_id: request_id.to_owned(),
            parts,
            body,
            canonical,
            routing,
        })
    }

    /// Verify the request signature, if any.
    ///
    /// # Errors
    ///
    /// Any signature failure, or a signed streaming payload without a
    /// request signature.
    pub async fn authenticate(
        &self,
        request: DecodedRequest,
    ) -> Result<AuthenticatedRequest, PipelineError> {
        let DecodedRequest {
            request_id,
            parts,
            body,
            canonical,
            routing,
        } = request;

        let authentication =
            s3gate_auth::authenticate(&canonical, &self.resolver, &self.policy, (self.clock)())
                .await?;

        let (identity, content_sha256, signature) = match authentication {
            Authentication::Anonymous => {
                let mode = match canonical.header("x-amz-content-sha256") {
                    Some(value) => ContentSha256::parse(value)?,
                    None => ContentSha256::Unsigned,
                };
                if mode.is_signed_streaming() {
                    return Err(PipelineError::MalformedRequest(
                        "signed streaming payload without a request signature".to_owned(),
                    ));
                }
                (Identity::Anonymous, mode, None)
            }
            Authentication::Signed(verified) => {
                if self.config.debug {
                    info!(
                        request_id,
                        string_to_sign = %verified.context.string_to_sign,
                        "signature verified"
                    );
                }
                (verified.identity(), verified.content_sha256, Some(verified))
            }
        };

        debug!(request_id, principal = identity.canonical_id(), %content_sha256, "request authenticated");
        Ok(AuthenticatedRequest {
            request_id,
            parts,
            body,
            routing,
            identity,
            content_sha256,
            signature,
        })
    }

    /// Install the aws-chunked decoder for streaming payloads, or the size
    /// limit for plain ones.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MalformedRequest`] for a streaming request without a
    /// valid `x-amz-decoded-content-length`, and
    /// [`PipelineError::BodyTooLarge`] when the declared size exceeds the
    /// configured maximum.
    pub fn stream(&self, request: AuthenticatedRequest) -> Result<StreamingRequest, PipelineError> {
        let AuthenticatedRequest {
            request_id,
            mut parts,
            body,
            routing,
            identity,
            content_sha256,
            signature,
        } = request;
        let max = self.config.max_object_size;

        let body = if content_sha256.is_streaming() {
            let decoded_length = parts
                .headers
                .get(DECODED_LENGTH_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    PipelineError::MalformedRequest(format!(
                        "missing or invalid {DECODED_LENGTH_HEADER}"
                    ))
                })?;
            if decoded_length > max {
                return Err(PipelineError::BodyTooLarge(format!(
                    "declared {decoded_length} bytes, limit {max}"
                )));
            }

            let mut options = ChunkedOptions::from_config(&self.config)
                .with_decoded_length(decoded_length)
                .with_trailer(content_sha256.has_trailer());
            if content_sha256.is_signed_streaming() {
                let signature = signature.ok_or_else(|| {
                    PipelineError::MalformedRequest(
                        "signed streaming payload without a request signature".to_owned(),
                    )
                })?;
                options = options.with_signer(signature.chunk_signer());
            }

            strip_aws_chunked_encoding(&mut parts.headers);
            parts
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(decoded_length));
            debug!(request_id, decoded_length, signed = content_sha256.is_signed_streaming(), "decoding aws-chunked body");
            into_request_body(AwsChunkedBody::new(body, options))
        } else {
            let declared = parts
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if declared.is_some_and(|len| len > max) {
                return Err(PipelineError::BodyTooLarge(format!(
                    "content-length exceeds {max}"
                )));
            }
            let limit = usize::try_from(max).unwrap_or(usize::MAX);
            into_request_body(Limited::new(body, limit).map_err(limit_error))
        };

        Ok(StreamingRequest {
            request_id,
            parts,
            body,
            routing,
            identity,
            content_sha256,
        })
    }

    /// Install the digest checks declared by the request.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidDigest`] for malformed digest headers and
    /// [`PipelineError::MalformedRequest`] for an unusable `x-amz-trailer`.
    pub fn check_integrity(
        &self,
        request: StreamingRequest,
    ) -> Result<IntegrityCheckedRequest, PipelineError> {
        let StreamingRequest {
            request_id,
            parts,
            body,
            routing,
            identity,
            content_sha256,
        } = request;

        let expected = ExpectedChecksums::from_headers(&parts.headers, &content_sha256)?;
        let body = if expected.is_empty() {
            body
        } else {
            debug!(
                request_id,
                declared = expected.declared().len(),
                trailer = ?expected.trailer(),
                "verifying payload integrity"
            );
            into_request_body(IntegrityBody::new(body, expected))
        };

        Ok(IntegrityCheckedRequest {
            request_id,
            parts,
            body,
            routing,
            identity,
        })
    }

    /// Evaluate the ACL.
    ///
    /// # Errors
    ///
    /// [`PipelineError::AccessDenied`] on a deny decision, and the
    /// enforcer's errors when metadata is unavailable.
    pub async fn authorize(
        &self,
        request: IntegrityCheckedRequest,
    ) -> Result<AuthorizedRequest, PipelineError> {
        let IntegrityCheckedRequest {
            request_id,
            parts,
            body,
            routing,
            identity,
        } = request;

        let decision = self
            .enforcer
            .decide(&identity, &routing.resource(), routing.action)
            .await?;
        if !decision.allowed {
            let reason = decision
                .deny_reason
                .unwrap_or_else(|| "access denied".to_owned());
            debug!(request_id, %reason, "request denied");
            return Err(PipelineError::AccessDenied(reason));
        }

        Ok(AuthorizedRequest {
            request: Request::from_parts(parts, body),
            ctx: DispatchContext {
                request_id,
                identity,
                routing,
                decision,
            },
        })
    }
}

fn limit_error(err: Box<dyn std::error::Error + Send + Sync>) -> PipelineError {
    match err.downcast::<PipelineError>() {
        Ok(err) => *err,
        Err(err) if err.is::<LengthLimitError>() => {
            PipelineError::BodyTooLarge("body exceeds the configured maximum".to_owned())
        }
        Err(err) => PipelineError::Internal(err.to_string()),
    }
}
