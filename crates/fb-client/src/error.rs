//! Client error types.

use thiserror::Error;

/// Result alias for client-library operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// SQLCODEs Firebird reports when a statement's parameters don't fit.
///
/// `-170` covers "input parameter mismatch for procedure", `-804` covers
/// SQLDA count/type problems.
const PARAMETER_MISMATCH_SQLCODES: &[i32] = &[-170, -804];

const PARAMETER_MISMATCH_MARKERS: &[&str] = &[
    "parameter mismatch",
    "sqlda",
    "count of column list",
    "count of read-write columns",
];

/// Errors raised by a client library or while preparing to use one.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A candidate client library could not be loaded or instantiated.
    #[error("failed to load client library {library}: {message}")]
    LibraryLoad {
        /// The library location that was tried.
        library: String,
        /// Loader-provided reason.
        message: String,
    },

    /// No client library candidate was available at all.
    #[error("no client library candidates available")]
    NoClientLibrary,

    /// The physical connection could not be established.
    #[error("connection to {uri} failed: {message}")]
    Connect {
        /// The connection URI that was attempted.
        uri: String,
        /// Driver-provided reason.
        message: String,
    },

    /// The server rejected a statement or transaction operation.
    #[error("{message} (SQLCODE {sqlcode})")]
    Database {
        /// Firebird SQLCODE.
        sqlcode: i32,
        /// Server message.
        message: String,
    },

    /// The connection dropped underneath an operation.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An identifier failed validation before being spliced into SQL.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl Error {
    /// Build a server-side error.
    pub fn database(sqlcode: i32, message: impl Into<String>) -> Self {
        Self::Database {
            sqlcode,
            message: message.into(),
        }
    }

    /// The SQLCODE of a server-side error.
    #[must_use]
    pub fn sqlcode(&self) -> Option<i32> {
        match self {
            Self::Database { sqlcode, .. } => Some(*sqlcode),
            _ => None,
        }
    }

    /// Whether the server refused the statement because the supplied
    /// parameters don't match the target's signature.
    ///
    /// Procedure probing treats this as "try the next candidate".
    #[must_use]
    pub fn is_parameter_mismatch(&self) -> bool {
        let Self::Database { sqlcode, message } = self else {
            return false;
        };

        if PARAMETER_MISMATCH_SQLCODES.contains(sqlcode) {
            return true;
        }

        let message = message.to_ascii_lowercase();
        PARAMETER_MISMATCH_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_mismatch_by_sqlcode() {
        assert!(Error::database(-170, "whatever").is_parameter_mismatch());
        assert!(Error::database(-804, "whatever").is_parameter_mismatch());
        assert!(!Error::database(-204, "Table unknown").is_parameter_mismatch());
    }

    #[test]
    fn test_parameter_mismatch_by_message() {
        let err = Error::database(-901, "Input parameter mismatch for procedure SP_SALES");
        assert!(err.is_parameter_mismatch());

        let err = Error::database(-901, "Incorrect values within SQLDA structure");
        assert!(err.is_parameter_mismatch());

        let err = Error::database(-901, "lock conflict on no wait transaction");
        assert!(!err.is_parameter_mismatch());
    }

    #[test]
    fn test_non_database_errors_never_mismatch() {
        assert!(!Error::ConnectionLost("parameter mismatch".into()).is_parameter_mismatch());
        assert!(!Error::NoClientLibrary.is_parameter_mismatch());
    }

    #[test]
    fn test_display() {
        let err = Error::database(-204, "Table unknown");
        assert_eq!(err.to_string(), "Table unknown (SQLCODE -204)");
        assert_eq!(err.sqlcode(), Some(-204));
    }
}
