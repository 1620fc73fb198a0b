//! Dispatch of fully verified requests to the business-logic handler.
//!
//! The dispatcher is the last gate: it only accepts an
//! [`AuthorizedRequest`](crate::pipeline::AuthorizedRequest), which can only be
//! produced by running every pipeline stage in order. The request body a
//! handler receives still verifies its digests as it is read, so a handler
//! must read the body to its end before committing anything.

use std::future::Future;
use std::pin::Pin;

use http::{Request, Response};
use s3gate_auth::Identity;
use s3gate_model::error::{S3Error, S3ErrorCode};

use crate::acl::AccessDecision;
use crate::body::{RequestBody, S3ResponseBody};
use crate::error::{FailureKind, PipelineError};
use crate::pipeline::AuthorizedRequest;
use crate::router::RoutingContext;

/// Everything the pipeline learned about a request, handed to the handler.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Gateway-assigned request id.
    pub request_id: String,
    /// The authenticated caller.
    pub identity: Identity,
    /// Bucket, key, and action.
    pub routing: RoutingContext,
    /// The ACL decision that let the request through.
    pub decision: AccessDecision,
}

/// Errors a handler may return.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The request body failed while the handler was reading it.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// The handler rejected the request.
    #[error(transparent)]
    S3(#[from] S3Error),
}

impl DispatchError {
    /// The protocol-shaped error returned to the client.
    #[must_use]
    pub fn into_s3_error(self) -> S3Error {
        match self {
            Self::Pipeline(err) => err.to_s3_error(),
            Self::S3(err) => err,
        }
    }

    /// Classification for audit and metrics.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Pipeline(err) => err.kind(),
            Self::S3(err) => match err.code {
                S3ErrorCode::NoSuchBucket | S3ErrorCode::NoSuchKey => FailureKind::NotFound,
                S3ErrorCode::AccessDenied => FailureKind::AccessDenied,
                S3ErrorCode::NotImplemented => FailureKind::Unsupported,
                S3ErrorCode::ServiceUnavailable => FailureKind::ServiceUnavailable,
                _ if err.status_code.is_server_error() => FailureKind::Internal,
                _ => FailureKind::MalformedRequest,
            },
        }
    }
}

/// Future returned by [`S3Handler::handle`].
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Response<S3ResponseBody>, DispatchError>> + Send>>;

/// Trait that the business logic provider must implement.
///
/// This is the boundary between the gateway and the storage backend. It is
/// object safe so the service layer can hold `Arc<dyn S3Handler>`.
pub trait S3Handler: Send + Sync + 'static {
    /// Handle an authorized request and produce an HTTP response.
    fn handle(&self, request: Request<RequestBody>, ctx: DispatchContext) -> HandlerFuture;
}

/// Hand an authorized request to `handler`.
pub async fn dispatch<H: S3Handler + ?Sized>(
    handler: &H,
    request: AuthorizedRequest,
) -> Result<Response<S3ResponseBody>, DispatchError> {
    let (request, ctx) = request.into_parts();
    tracing::debug!(
        action = %ctx.routing.action,
        bucket = ?ctx.routing.bucket,
        key = ?ctx.routing.key,
        "dispatching request"
    );
    handler.handle(request, ctx).await
}

/// A handler that answers `NotImplemented` to everything.
#[derive(Debug, Clone, Default)]
pub struct NotImplementedHandler;

impl S3Handler for NotImplementedHandler {
    fn handle(&self, _request: Request<RequestBody>, ctx: DispatchContext) -> HandlerFuture {
        Box::pin(async move { Err(S3Error::not_implemented(ctx.routing.action.as_str()).into()) })
    }
}
