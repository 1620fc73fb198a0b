//! Core building blocks shared by every s3gate crate.
//!
//! This crate provides the immutable gateway configuration that is threaded
//! through the request pipeline, the core error type, and the bounded-staleness
//! cache used for credential and ACL metadata lookups.

mod cache;
mod config;
mod error;

pub use cache::TtlCache;
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
