use std::fmt;
use std::io;

/// Result alias used across the dispatcher and the execution engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop an invocation from producing a reply.
///
/// The execution engine returns these directly so the dispatcher can
/// propagate them unchanged; only [`Error::CallTimeout`] and
/// [`Error::ServerBusy`] get special treatment (see [`Error::is_wait_timeout`]).
#[derive(Debug)]
pub enum Error {
    /// The request body of an async call could not be read
    InvalidPayload(io::Error),
    /// Upstream routing did not place an application id in the request context
    MissingAppId,
    /// No application with the given id or name
    AppNotFound(String),
    /// The application has no function bound to the path
    RouteNotFound {
        /// Application name
        app: String,
        /// Cleaned request path
        path: String,
    },
    /// The request could not be turned into a call
    InvalidCall(String),
    /// The call did not finish within its timeout
    CallTimeout,
    /// The engine had no capacity to start the call
    ServerBusy,
    /// The async queue refused the call
    QueueFull,
    /// The function itself reported an error or panicked
    FunctionFailed(String),
    /// Anything else
    Internal(String),
}

impl Error {
    /// Timeouts and busy rejections, the two outcomes that carry a wait-duration header.
    #[must_use]
    pub fn is_wait_timeout(&self) -> bool {
        matches!(self, Error::CallTimeout | Error::ServerBusy)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPayload(e) => write!(f, "Invalid payload: {e}"),
            Error::MissingAppId => write!(f, "No application id in request context"),
            Error::AppNotFound(app) => write!(f, "App not found: {app}"),
            Error::RouteNotFound { app, path } => {
                write!(f, "Route not found: app '{app}' has no function at '{path}'")
            }
            Error::InvalidCall(msg) => write!(f, "Invalid call: {msg}"),
            Error::CallTimeout => write!(f, "Timed out"),
            Error::ServerBusy => write!(f, "Timed out - server too busy"),
            Error::QueueFull => write!(f, "Async queue is full"),
            Error::FunctionFailed(msg) => write!(f, "Function failed: {msg}"),
            Error::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidPayload(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_timeout_classification() {
        assert!(Error::CallTimeout.is_wait_timeout());
        assert!(Error::ServerBusy.is_wait_timeout());
        assert!(!Error::QueueFull.is_wait_timeout());
        assert!(!Error::FunctionFailed("boom".into()).is_wait_timeout());
        assert!(!Error::InvalidPayload(io::Error::other("x")).is_wait_timeout());
    }

    #[test]
    fn test_display_route_not_found() {
        let err = Error::RouteNotFound {
            app: "myapp".into(),
            path: "/hello".into(),
        };
        assert_eq!(
            err.to_string(),
            "Route not found: app 'myapp' has no function at '/hello'"
        );
    }

    #[test]
    fn test_invalid_payload_has_source() {
        use std::error::Error as _;
        let err = Error::InvalidPayload(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.source().is_some());
    }
}
