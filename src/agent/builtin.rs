//! Built-in functions that can be declared from configuration.

use super::function::{FunctionFn, Invocation};
use crate::capture::ResponseCapture;
use crate::error::{Error, Result};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// A function kind as written in the apps file
///
/// ```yaml
/// function:
///   kind: static
///   body: '{"hello":"world"}'
///   status: 201
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Builtin {
    /// Reply with the input, keeping the request content-type
    Echo,
    /// Reply with a fixed body
    Static {
        body: String,
        #[serde(default)]
        content_type: Option<String>,
        #[serde(default)]
        status: Option<u16>,
    },
    /// Wait, then reply with `body`
    Sleep {
        millis: u64,
        #[serde(default)]
        body: String,
    },
    /// Always fail with `message`
    Fail { message: String },
}

impl Builtin {
    /// Turn the declaration into a callable function
    ///
    /// Header values and status codes are checked here so a bad apps file
    /// fails at startup rather than on the first call.
    pub fn into_function(self) -> Result<FunctionFn> {
        match self {
            Builtin::Echo => Ok(Arc::new(echo)),
            Builtin::Static {
                body,
                content_type,
                status,
            } => {
                let content_type = content_type
                    .map(|ct| {
                        HeaderValue::from_str(&ct).map_err(|e| {
                            Error::Internal(format!("invalid content_type {ct:?}: {e}"))
                        })
                    })
                    .transpose()?;
                let status = status
                    .map(|code| {
                        StatusCode::from_u16(code)
                            .map_err(|e| Error::Internal(format!("invalid status {code}: {e}")))
                    })
                    .transpose()?;
                Ok(Arc::new(move |_: &Invocation, out: &mut ResponseCapture| {
                    if let Some(ct) = &content_type {
                        out.headers_mut().insert(CONTENT_TYPE, ct.clone());
                    }
                    if let Some(status) = status {
                        out.write_header(status);
                    }
                    out.write_all(body.as_bytes()).map_err(|e| e.to_string())
                }))
            }
            Builtin::Sleep { millis, body } => {
                let pause = Duration::from_millis(millis);
                Ok(Arc::new(move |_: &Invocation, out: &mut ResponseCapture| {
                    may::coroutine::sleep(pause);
                    out.write_all(body.as_bytes()).map_err(|e| e.to_string())
                }))
            }
            Builtin::Fail { message } => Ok(Arc::new(
                move |_: &Invocation, _: &mut ResponseCapture| Err(message.clone()),
            )),
        }
    }
}

fn echo(inv: &Invocation, out: &mut ResponseCapture) -> std::result::Result<(), String> {
    if let Some(ct) = inv.headers.get(CONTENT_TYPE) {
        out.headers_mut().insert(CONTENT_TYPE, ct.clone());
    }
    out.write_all(&inv.input).map_err(|e| e.to_string())
}
