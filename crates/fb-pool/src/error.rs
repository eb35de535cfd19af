//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by pools and the query executor.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// A client-library failure, passed through unchanged.
    #[error(transparent)]
    Client(#[from] fb_client::Error),

    /// The pool stayed saturated for the whole acquisition deadline.
    #[error("timed out after {waited:?} waiting for a connection to {target}")]
    AcquireTimeout {
        /// How long the caller waited.
        waited: Duration,
        /// Pool key of the saturated pool.
        target: String,
    },

    /// The pool was closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Invalid pool configuration.
    #[error("pool configuration error: {0}")]
    Config(String),

    /// A procedure call was issued without any candidate name or parameter set.
    #[error("procedure call has no candidate {0}")]
    NoProcedureCandidates(&'static str),
}

impl PoolError {
    /// The original client-library error, if this is one.
    #[must_use]
    pub fn client_error(&self) -> Option<&fb_client::Error> {
        match self {
            Self::Client(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the server refused a statement because of its parameter shape.
    #[must_use]
    pub fn is_parameter_mismatch(&self) -> bool {
        self.client_error()
            .is_some_and(fb_client::Error::is_parameter_mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_transparent() {
        let original = fb_client::Error::database(-204, "Table unknown");
        let err = PoolError::from(original.clone());
        assert_eq!(err.to_string(), original.to_string());
        assert!(matches!(
            err.client_error(),
            Some(fb_client::Error::Database { sqlcode: -204, .. })
        ));
    }

    #[test]
    fn test_parameter_mismatch_passthrough() {
        let err = PoolError::from(fb_client::Error::database(-170, "mismatch"));
        assert!(err.is_parameter_mismatch());
        assert!(!PoolError::PoolClosed.is_parameter_mismatch());
    }
}
