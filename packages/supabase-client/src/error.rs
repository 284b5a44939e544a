//! Error types for the Supabase client.

use thiserror::Error;

/// Result type for Supabase client operations.
pub type Result<T> = std::result::Result<T, SupabaseError>;

/// Supabase client errors.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// Configuration error (missing URL or key, malformed base URL)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, request could not be sent)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response from one of the Supabase services
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Realtime socket or channel failure
    #[error("Realtime error: {0}")]
    Realtime(String),
}

impl From<url::ParseError> for SupabaseError {
    fn from(e: url::ParseError) -> Self {
        SupabaseError::Config(format!("invalid URL: {}", e))
    }
}

impl From<serde_json::Error> for SupabaseError {
    fn from(e: serde_json::Error) -> Self {
        SupabaseError::Parse(e.to_string())
    }
}
