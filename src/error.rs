//! Error types for RFI review.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures raised by an item data provider (as opposed to business
/// failures, which come back as a failed `ProviderReply`).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Item provider unavailable: {0}")]
    Unavailable(String),

    #[error("Item store failure: {0}")]
    Database(#[from] DatabaseError),
}

/// HTTP surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server stopped: {0}")]
    Serve(String),
}
