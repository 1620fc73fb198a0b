//! Error types for the s3gate core.

/// Core error type for gateway infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A configuration value could not be parsed or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for core operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
