//! Common error types for Huddle components.

use thiserror::Error;

/// Errors shared by Huddle components that talk to the same infrastructure.
#[derive(Error, Debug)]
pub enum HuddleError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Call to a collaborating service failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using `HuddleError`
pub type Result<T> = std::result::Result<T, HuddleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        assert_eq!(
            HuddleError::Upstream("group service timed out".to_string()).to_string(),
            "Upstream error: group service timed out"
        );
        assert_eq!(
            HuddleError::NotFound("session".to_string()).to_string(),
            "Not found: session"
        );
    }
}
