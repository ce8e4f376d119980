//! Mapping of crate errors to HTTP error responses.

use crate::error::Error;
use http::StatusCode;
use serde_json::{json, Value};

/// Status and JSON body for an error: `{"error":{"message":"..."}}`
#[must_use]
pub fn error_response(err: &Error) -> (StatusCode, Value) {
    let status = match err {
        Error::InvalidPayload(_) | Error::InvalidCall(_) => StatusCode::BAD_REQUEST,
        Error::AppNotFound(_) | Error::RouteNotFound { .. } => StatusCode::NOT_FOUND,
        Error::CallTimeout => StatusCode::GATEWAY_TIMEOUT,
        Error::ServerBusy | Error::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        Error::FunctionFailed(_) => StatusCode::BAD_GATEWAY,
        Error::MissingAppId | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error_body(&err.to_string()))
}

/// Error document with a message
#[must_use]
pub fn error_body(message: &str) -> Value {
    json!({ "error": { "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                Error::InvalidPayload(io::Error::new(io::ErrorKind::UnexpectedEof, "eof")),
                400,
            ),
            (Error::MissingAppId, 500),
            (Error::AppNotFound("x".into()), 404),
            (
                Error::RouteNotFound {
                    app: "a".into(),
                    path: "/p".into(),
                },
                404,
            ),
            (Error::InvalidCall("bad".into()), 400),
            (Error::CallTimeout, 504),
            (Error::ServerBusy, 503),
            (Error::QueueFull, 503),
            (Error::FunctionFailed("boom".into()), 502),
            (Error::Internal("oops".into()), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(&err).0.as_u16(), expected, "{err}");
        }
    }

    #[test]
    fn test_body_shape() {
        let (_, body) = error_response(&Error::CallTimeout);
        assert_eq!(body["error"]["message"], Error::CallTimeout.to_string());
    }
}
