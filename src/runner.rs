//! Request entry point for function calls.
//!
//! Upstream routing places the application id and function path into the
//! [`RequestContext`]; [`Runner::handle_function_call`] resolves the
//! application, hands the request to the [`Dispatcher`] and turns whatever
//! comes back into one complete [`HttpReply`].

use crate::call::{InboundRequest, RequestContext};
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::error::{Error, Result};
use crate::response::{HttpReply, ReplyBody, ResponseHead};
use crate::server::errors::error_response;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde_json::json;
use tracing::{error, warn};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Entry point wired to the function-call route
pub struct Runner {
    dispatcher: Dispatcher,
}

impl Runner {
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one function call and produce the reply to relay
    pub fn handle_function_call(
        &self,
        ctx: &mut RequestContext,
        mut req: InboundRequest<'_>,
    ) -> HttpReply {
        let mut head = ResponseHead::default();
        match self.serve(ctx, &mut req, &mut head) {
            Ok(Dispatched::Accepted(call_id)) => {
                head.status = StatusCode::ACCEPTED;
                json_reply(head, &json!({ "call_id": call_id }))
            }
            Ok(Dispatched::Completed(capture)) => HttpReply {
                head,
                body: ReplyBody::Buffered(capture.into_reader()),
            },
            Err(e) => {
                let (status, body) = error_response(&e);
                if status.is_server_error() {
                    error!(
                        call_id = ?ctx.call_id.map(|id| id.to_string()),
                        app_id = ?ctx.app_id,
                        path = ?ctx.path,
                        error = %e,
                        "Function call failed"
                    );
                } else {
                    warn!(
                        call_id = ?ctx.call_id.map(|id| id.to_string()),
                        app_id = ?ctx.app_id,
                        path = ?ctx.path,
                        error = %e,
                        "Function call rejected"
                    );
                }
                head.status = status;
                json_reply(head, &body)
            }
        }
    }

    fn serve(
        &self,
        ctx: &mut RequestContext,
        req: &mut InboundRequest<'_>,
        head: &mut ResponseHead,
    ) -> Result<Dispatched> {
        let path = clean_path(ctx.path.as_deref().unwrap_or("/"));
        let app_id = ctx.app_id.as_deref().ok_or(Error::MissingAppId)?;
        let app = self.dispatcher.agent().get_app_by_id(app_id)?;

        head.status = StatusCode::OK;
        self.dispatcher.dispatch(&app, &path, req, head, ctx)
    }
}

/// JSON reply keeping any headers already on `head`
pub(crate) fn json_reply(mut head: ResponseHead, body: &serde_json::Value) -> HttpReply {
    head.headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    HttpReply {
        head,
        body: ReplyBody::Bytes(body.to_string().into_bytes()),
    }
}

/// Lexically clean a function path
///
/// Repeated slashes collapse, `.` segments vanish and `..` removes the
/// previous segment (never climbing above the root). The result always
/// starts with `/` and has no trailing slash unless it is the root.
#[must_use]
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut cleaned = String::with_capacity(path.len() + 1);
    for segment in segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    cleaned
}
