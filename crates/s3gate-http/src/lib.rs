//! Streaming verification, authorization, and the hyper service for s3gate.
//!
//! Requests flow through a fixed sequence of stages, each represented by
//! its own type so that no stage can be skipped:
//!
//! ```text
//! HTTP Request
//!   -> GatewayService (health / CORS / metrics interception)
//!     -> Pipeline::decode        canonical request + routing
//!     -> Pipeline::authenticate  SigV4 header or presigned URL
//!     -> Pipeline::stream        aws-chunked decoding, size limits
//!     -> Pipeline::check_integrity  Content-MD5, x-amz-checksum-*, trailers
//!     -> Pipeline::authorize     ACL evaluation
//!     -> dispatch                S3Handler
//!   <- HTTP Response (+ audit record, metrics, object events)
//! ```
//!
//! Body-level checks run lazily while the handler reads the body, and
//! surface as [`PipelineError`]s from that body. A handler that reads its
//! body to completion before committing never commits unverified data.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use s3gate_auth::StaticIdentityService;
//! use s3gate_core::GatewayConfig;
//! use s3gate_http::{GatewayService, NotImplementedHandler, Pipeline};
//! # use s3gate_http::backend::{Backend, BackendError};
//! # use s3gate_model::AclMetadata;
//! # struct NoBuckets;
//! # #[async_trait::async_trait]
//! # impl Backend for NoBuckets {
//! #     async fn get_bucket_acl(&self, b: &str) -> Result<AclMetadata, BackendError> {
//! #         Err(BackendError::NoSuchBucket(b.to_owned()))
//! #     }
//! #     async fn get_object_acl(&self, b: &str, _k: &str) -> Result<AclMetadata, BackendError> {
//! #         Err(BackendError::NoSuchBucket(b.to_owned()))
//! #     }
//! # }
//!
//! let config = Arc::new(GatewayConfig::default());
//! let identities = Arc::new(StaticIdentityService::default());
//! let pipeline = Pipeline::new(config, identities, Arc::new(NoBuckets));
//! let service = GatewayService::new(Arc::new(pipeline), Arc::new(NotImplementedHandler));
//! // Serve `service` with hyper.
//! # let _ = service;
//! ```

pub mod acl;
pub mod audit;
pub mod backend;
pub mod body;
pub mod checksums;
pub mod chunked;
pub mod dispatch;
pub mod error;
pub mod integrity;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod response;
pub mod router;
pub mod service;
pub mod timeout;

#[cfg(test)]
pub(crate) mod testing;

pub use acl::{AccessDecision, AclEnforcer, Resource};
pub use backend::{Backend, BackendError};
pub use body::{RequestBody, S3ResponseBody};
pub use dispatch::{DispatchContext, DispatchError, NotImplementedHandler, S3Handler};
pub use error::{FailureKind, PipelineError};
pub use pipeline::{AuthorizedRequest, Pipeline, RequestTrace};
pub use router::{RoutingContext, S3Router};
pub use service::GatewayService;
