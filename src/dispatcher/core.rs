//! Dispatcher core - per-request hot path.

use super::wait::format_wait;
use crate::agent::Agent;
use crate::buffer_pool::BufferPool;
use crate::call::{App, Call, CallMode, InboundRequest, RequestContext};
use crate::capture::ResponseCapture;
use crate::error::{Error, Result};
use crate::ids::CallId;
use crate::negotiate::negotiate;
use crate::response::ResponseHead;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// Diagnostic header carrying the time a failed sync call spent waiting
pub const WAIT_HEADER: HeaderName = HeaderName::from_static("xxx-fxlb-wait");

/// What a dispatch produced
#[derive(Debug)]
pub enum Dispatched {
    /// Async call accepted by the engine
    Accepted(CallId),
    /// Sync call finished; headers and status are already committed to the
    /// real response, the capture still holds the body
    Completed(ResponseCapture),
}

/// Routes one request through the execution engine
pub struct Dispatcher {
    agent: Arc<dyn Agent>,
    pool: Arc<BufferPool>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>, pool: Arc<BufferPool>) -> Self {
        Self { agent, pool }
    }

    #[must_use]
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Buffer pool backing every capture, exposed for metrics
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Build and run (or enqueue) the call for `path` of `app`.
    ///
    /// `sink` is the real response head. On success it gets the committed
    /// capture head; otherwise it gets the builder's staged headers plus the
    /// wait header on timeout/busy. `ctx.call_id` is set as soon as the call
    /// exists.
    pub fn dispatch(
        &self,
        app: &App,
        path: &str,
        req: &mut InboundRequest<'_>,
        sink: &mut ResponseHead,
        ctx: &mut RequestContext,
    ) -> Result<Dispatched> {
        let capture = ResponseCapture::new(self.pool.acquire(), sink.headers.clone());
        let call = self.agent.build_call(capture, app, path, req)?;
        ctx.call_id = Some(call.id());

        let span = info_span!(
            "call",
            call_id = %call.id(),
            app_id = %app.id,
            path = %call.path(),
            mode = %call.mode()
        );
        let _enter = span.enter();

        match call.mode() {
            CallMode::Async => self.dispatch_async(call, req, sink),
            CallMode::Sync => self.dispatch_sync(call, sink),
        }
    }

    fn dispatch_async(
        &self,
        mut call: Call,
        req: &mut InboundRequest<'_>,
        sink: &mut ResponseHead,
    ) -> Result<Dispatched> {
        let mut capture = call
            .take_output()
            .ok_or_else(|| Error::Internal("call built without an output target".into()))?;

        let buffer = capture.buffer_mut();
        if let Some(len) = req.content_length {
            // Untrusted length: never reserve more than a pooled buffer may keep
            let hint = usize::try_from(len)
                .unwrap_or(usize::MAX)
                .min(self.pool.config().max_retained_bytes);
            buffer.reserve(hint);
        }
        req.body.read_to_end(buffer).map_err(|e| {
            warn!(error = %e, "Failed to read async payload");
            Error::InvalidPayload(e)
        })?;

        call.payload = Some(buffer.to_vec());
        let payload_bytes = buffer.len();
        carry_headers(capture.headers(), sink);
        drop(capture);

        let id = call.id();
        self.agent.enqueue(call)?;
        info!(payload_bytes, "Async call accepted");
        Ok(Dispatched::Accepted(id))
    }

    fn dispatch_sync(&self, mut call: Call, sink: &mut ResponseHead) -> Result<Dispatched> {
        // Headers staged by the builder; the engine holds the capture while the call runs
        let staged = call.output_mut().map(|capture| capture.headers().clone());

        if let Err(e) = self.agent.submit(&mut call) {
            if let Some(staged) = &staged {
                carry_headers(staged, sink);
            }
            let elapsed = call.elapsed();
            if e.is_wait_timeout() {
                let wait = format_wait(elapsed);
                if let Ok(value) = HeaderValue::from_str(&wait) {
                    sink.headers.insert(WAIT_HEADER, value);
                }
                warn!(error = %e, wait = %wait, "Sync call did not complete");
            } else {
                warn!(
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Sync call failed"
                );
            }
            return Err(e);
        }

        let mut capture = call
            .take_output()
            .ok_or_else(|| Error::Internal("engine did not return the call output".into()))?;
        negotiate(&mut capture);
        capture.commit_head(sink);

        debug!(
            status = sink.status.as_u16(),
            body_bytes = capture.len(),
            elapsed_ms = call.elapsed().as_millis() as u64,
            "Sync call complete"
        );
        Ok(Dispatched::Completed(capture))
    }
}

/// Copy staged headers onto the real head for a reply that carries no
/// function output; body-derived headers are left to that reply.
fn carry_headers(staged: &HeaderMap, sink: &mut ResponseHead) {
    sink.headers.clone_from(staged);
    sink.headers.remove(CONTENT_TYPE);
    sink.headers.remove(CONTENT_LENGTH);
}
