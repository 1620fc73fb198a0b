//! The gateway's hyper `Service`.
//!
//! [`GatewayService`] answers the out-of-band endpoints itself and sends
//! everything else through the [`Pipeline`] and on to the [`S3Handler`]:
//!
//! 1. Health probe (`GET` on the configured path)
//! 2. CORS preflight (`OPTIONS`)
//! 3. Metrics scrape (`GET /_s3gate/metrics`)
//! 4. Pipeline stages under the whole-request deadline
//! 5. Dispatch, followed by audit, latency, notifications, and ACL cache
//!    invalidation
//! 6. Common response headers

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use hyper::body::Incoming;
use hyper::service::Service;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::body::S3ResponseBody;
use crate::dispatch::{DispatchError, S3Handler, dispatch};
use crate::error::PipelineError;
use crate::metrics::Stage;
use crate::notify::{EventNotifier, ObjectEvent, TracingNotifier};
use crate::pipeline::{Pipeline, RequestTrace};
use crate::response::{add_common_headers, add_cors_headers, error_to_response};

/// Path of the Prometheus text endpoint.
pub const METRICS_PATH: &str = "/_s3gate/metrics";

/// hyper service running every request through the verification pipeline.
pub struct GatewayService<H: S3Handler> {
    pipeline: Arc<Pipeline>,
    handler: Arc<H>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn EventNotifier>,
}

impl<H: S3Handler> std::fmt::Debug for GatewayService<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayService")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl<H: S3Handler> Clone for GatewayService<H> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            handler: Arc::clone(&self.handler),
            audit: Arc::clone(&self.audit),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<H: S3Handler> GatewayService<H> {
    /// Serve `handler` behind `pipeline`, auditing and notifying through
    /// `tracing`.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, handler: Arc<H>) -> Self {
        Self {
            pipeline,
            handler,
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Send audit records to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Send object events to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn EventNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The pipeline in front of the handler.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Answer one request. Never fails: every error becomes an S3 error
    /// response.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<S3ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<PipelineError>,
    {
        let request_id = Uuid::new_v4().simple().to_string();
        let started = Instant::now();
        let timestamp = Utc::now();
        let method = request.method().clone();
        let path = request.uri().path().to_owned();

        if let Some(mut response) = self.intercept(&method, &path) {
            add_common_headers(&mut response, &request_id);
            return response;
        }

        let mut trace = RequestTrace::default();
        let deadline = self.pipeline.config().request_timeout();
        let outcome =
            match tokio::time::timeout(deadline, self.run(request, &request_id, &mut trace)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchError::Pipeline(PipelineError::RequestTimeout)),
            };

        let (mut response, failure, detail) = match outcome {
            Ok(response) => (response, None, None),
            Err(err) => {
                let kind = err.kind();
                let detail = err.to_string();
                if kind.is_denial() {
                    warn!(request_id, failure = kind.as_str(), %detail, "request denied");
                } else {
                    debug!(request_id, failure = kind.as_str(), %detail, "request failed");
                }
                let s3_error = err.into_s3_error();
                let s3_error = if s3_error.resource.is_none() {
                    s3_error.with_resource(path.clone())
                } else {
                    s3_error
                };
                (error_to_response(&s3_error, &request_id), Some(kind), Some(detail))
            }
        };

        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let action = trace.routing.as_ref().map(|r| r.action);
        self.pipeline.metrics().record_latency(action, elapsed);

        if failure.is_none() && response.status().is_success() {
            self.after_success(&trace, &request_id);
        }

        let status = response.status();
        self.audit.record(&AuditEvent {
            request_id: request_id.clone(),
            timestamp,
            method: method.to_string(),
            path: path.clone(),
            bucket: trace.routing.as_ref().and_then(|r| r.bucket.clone()),
            key: trace.routing.as_ref().and_then(|r| r.key.clone()),
            action: action.map(|a| a.as_str().to_owned()),
            access_key_id: trace
                .identity
                .as_ref()
                .and_then(|i| i.access_key_id().map(str::to_owned)),
            principal: trace.identity.as_ref().map(|i| i.canonical_id().to_owned()),
            outcome: failure.map_or(AuditOutcome::Accepted, AuditOutcome::from_failure),
            failure,
            detail,
            status: status.as_u16(),
            elapsed_ms,
        });

        if !self.pipeline.config().quiet {
            info!(
                target: "s3gate::access",
                request_id,
                %method,
                path,
                status = status.as_u16(),
                elapsed_ms,
                "request completed"
            );
        }

        add_common_headers(&mut response, &request_id);
        add_cors_headers(&mut response);
        response
    }

    async fn run<B>(
        &self,
        request: Request<B>,
        request_id: &str,
        trace: &mut RequestTrace,
    ) -> Result<Response<S3ResponseBody>, DispatchError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<PipelineError>,
    {
        let authorized = self.pipeline.process(request, request_id, trace).await?;
        let result = dispatch(self.handler.as_ref(), authorized).await;
        self.pipeline.metrics().record_stage(
            Stage::Dispatch,
            result.as_ref().map(|_| ()).map_err(DispatchError::kind),
        );
        result
    }

    fn after_success(&self, trace: &RequestTrace, request_id: &str) {
        let Some(routing) = &trace.routing else {
            return;
        };
        if !routing.action.is_mutating() {
            return;
        }

        self.pipeline.enforcer().invalidate(&routing.resource());

        if let (Some(event_name), Some(bucket)) = (routing.action.event_name(), &routing.bucket) {
            self.notifier.notify(ObjectEvent {
                event_name,
                bucket: bucket.clone(),
                key: routing.key.clone(),
                principal: trace
                    .identity
                    .as_ref()
                    .map_or_else(String::new, |i| i.canonical_id().to_owned()),
                request_id: request_id.to_owned(),
                time: Utc::now(),
            });
        }
    }

    fn intercept(&self, method: &Method, path: &str) -> Option<Response<S3ResponseBody>> {
        let config = self.pipeline.config();
        if *method == Method::OPTIONS {
            return Some(cors_preflight_response());
        }
        if *method != Method::GET {
            return None;
        }
        if config.health_path.as_deref() == Some(path) {
            return Some(health_check_response());
        }
        if path == METRICS_PATH {
            return Some(match self.pipeline.metrics().render() {
                Some(text) => metrics_response(text),
                None => static_response(StatusCode::NOT_FOUND),
            });
        }
        None
    }
}

impl<H: S3Handler> Service<Request<Incoming>> for GatewayService<H> {
    type Response = Response<S3ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(request).await) })
    }
}

fn health_check_response() -> Response<S3ResponseBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(S3ResponseBody::from_string(
            r#"{"status":"running","service":"s3gate"}"#,
        ))
        .expect("static response should be valid")
}

fn metrics_response(text: String) -> Response<S3ResponseBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(S3ResponseBody::from_string(text))
        .expect("static response should be valid")
}

fn cors_preflight_response() -> Response<S3ResponseBody> {
    let mut response = static_response(StatusCode::OK);
    add_cors_headers(&mut response);
    response.headers_mut().insert(
        http::header::ACCESS_CONTROL_MAX_AGE,
        http::HeaderValue::from_static("86400"),
    );
    response
}

fn static_response(status: StatusCode) -> Response<S3ResponseBody> {
    Response::builder()
        .status(status)
        .body(S3ResponseBody::empty())
        .expect("static response should be valid")
}
