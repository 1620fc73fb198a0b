//! Shared S3 protocol types for the s3gate request pipeline.
//!
//! * [`error`] - S3 error codes and the protocol-shaped [`S3Error`].
//! * [`acl`] - access-control metadata attached to buckets and objects.
//! * [`action`] - the S3 actions the gateway recognizes, classified by the
//!   permission they require and whether they mutate state.

pub mod acl;
pub mod action;
pub mod error;

pub use acl::{AclMetadata, CannedAcl, Grant, GrantEffect, Grantee, Owner, Permission};
pub use action::{ActionTarget, S3Action};
pub use error::{S3Error, S3ErrorCode};
