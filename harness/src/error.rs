use thiserror::Error;

/// Synthetic HTTP-like status attached to errors that mirror what the real
/// remote service would return, so client error handling is exercised
/// identically to production.
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;

/// Errors surfaced by the fake backend and transports.
#[derive(Debug, Error)]
pub enum Error {
    /// A transport call the harness does not model. Raised loudly rather
    /// than silently no-op-ing, so unmodeled calls surface as test failures.
    #[error("unsupported operation not captured by the test framework: {0}")]
    UnsupportedOperation(String),

    /// Permission check failed for the acting user.
    #[error("Forbidden (status {status}): missing {reason}")]
    Forbidden { status: u16, reason: String },

    /// A fetch-by-id operation could not locate its target.
    #[error("Not Found (status {status}): {reason}")]
    NotFound { status: u16, reason: String },

    /// A core operation was called before `configure`, or with invalid input.
    #[error("backend not configured")]
    NotConfigured,

    /// Invalid argument to a factory or mutation function.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Error propagated out of an event handler under test.
    #[error("handler error: {0}")]
    Handler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Error::Forbidden {
            status: STATUS_FORBIDDEN,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Error::NotFound {
            status: STATUS_NOT_FOUND,
            reason: reason.into(),
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Error::UnsupportedOperation(what.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_carries_403() {
        let err = Error::forbidden("send_messages");
        match err {
            Error::Forbidden { status, ref reason } => {
                assert_eq!(status, 403);
                assert_eq!(reason, "send_messages");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_not_found_carries_404() {
        let err = Error::not_found("Unknown Message");
        match err {
            Error::NotFound { status, .. } => assert_eq!(status, 404),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_display_includes_reason() {
        let err = Error::forbidden("manage_roles");
        assert!(err.to_string().contains("manage_roles"));
        assert!(err.to_string().contains("403"));
    }
}
