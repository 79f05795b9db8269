//! Error types reported by the PostgreSQL protocol layer.

use std::fmt;
use std::io;

/// Result type for protocol-layer operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that a [`Backend`](super::protocol::Backend) can report.
#[derive(Debug)]
pub enum PgError {
    /// I/O error during communication.
    Io(io::Error),

    /// Protocol error (unexpected message, invalid format, etc.).
    Protocol(String),

    /// Server returned an error.
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    /// Connection is closed or in invalid state.
    ConnectionClosed,

    /// The backend does not implement the requested primitive.
    Unsupported(&'static str),
}

impl PgError {
    /// Build a server error from a SQLSTATE code and message.
    pub fn server(code: &str, message: impl Into<String>) -> Self {
        PgError::Server {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// The SQLSTATE code, if the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            PgError::Server {
                severity,
                code,
                message,
                detail,
                hint,
            } => {
                write!(f, "{}: {} ({})", severity, message, code)?;
                if let Some(d) = detail {
                    write!(f, "\nDetail: {}", d)?;
                }
                if let Some(h) = hint {
                    write!(f, "\nHint: {}", h)?;
                }
                Ok(())
            }
            PgError::ConnectionClosed => write!(f, "Connection is closed"),
            PgError::Unsupported(what) => write!(f, "Unsupported operation: {}", what),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PgError {
    fn from(e: io::Error) -> Self {
        PgError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = PgError::Server {
            severity: "ERROR".to_string(),
            code: "42P01".to_string(),
            message: "relation \"nope\" does not exist".to_string(),
            detail: None,
            hint: Some("check the table name".to_string()),
        };
        let text = err.to_string();
        assert!(text.starts_with("ERROR: relation \"nope\" does not exist (42P01)"));
        assert!(text.ends_with("Hint: check the table name"));
        assert_eq!(err.code(), Some("42P01"));
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error as _;

        let err = PgError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.source().is_some());
        assert_eq!(err.code(), None);
    }
}
