//! Data model shared by the dispatcher and the execution engine.

use crate::capture::ResponseCapture;
use crate::ids::CallId;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};

/// How a call is executed; fixed when the call is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// Run now, block the request until the output is known
    Sync,
    /// Queue for later, acknowledge with the call id
    Async,
}

impl CallMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Sync => "sync",
            CallMode::Async => "async",
        }
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An application owning a set of function routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    pub id: String,
    pub name: String,
}

/// Request-scoped values placed by upstream routing, plus the diagnostic
/// context the dispatcher attaches once a call exists.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Function path below the application, as matched by the router
    pub path: Option<String>,
    /// Id of the application the request is addressed to
    pub app_id: Option<String>,
    /// Correlation id, set by the dispatcher after the call is built
    pub call_id: Option<CallId>,
}

impl RequestContext {
    #[must_use]
    pub fn new(app_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            app_id: Some(app_id.into()),
            call_id: None,
        }
    }
}

/// An inbound request as seen by the call builder
///
/// The body is a borrowed reader so the listener keeps ownership of the
/// connection; whoever needs the bytes reads them before the request ends.
pub struct InboundRequest<'a> {
    pub method: Method,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Declared `Content-Length`, when the client sent one
    pub content_length: Option<u64>,
    pub body: &'a mut dyn Read,
}

impl fmt::Debug for InboundRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("method", &self.method)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// One invocation of one function
///
/// Built by the engine from a request. The mode never changes after
/// construction; a sync call carries the capture its output goes to.
#[derive(Debug)]
pub struct Call {
    id: CallId,
    app: App,
    path: String,
    mode: CallMode,
    created_at: Instant,
    pub method: Method,
    pub query: Option<String>,
    /// Request headers as the function will see them
    pub headers: HeaderMap,
    /// Function input read by the builder (sync calls)
    pub input: Vec<u8>,
    /// Raw request body, filled in by the dispatcher before enqueue (async calls)
    pub payload: Option<Vec<u8>>,
    /// Upper bound on execution time
    pub timeout: Duration,
    output: Option<ResponseCapture>,
}

impl Call {
    /// Create a call with a fresh id, stamped with the current time
    #[must_use]
    pub fn new(app: App, path: impl Into<String>, mode: CallMode, output: ResponseCapture) -> Self {
        Self::with_id(CallId::new(), app, path, mode, output)
    }

    /// Create a call under an id the engine already handed out
    #[must_use]
    pub fn with_id(
        id: CallId,
        app: App,
        path: impl Into<String>,
        mode: CallMode,
        output: ResponseCapture,
    ) -> Self {
        Self {
            id,
            app,
            path: path.into(),
            mode,
            created_at: Instant::now(),
            method: Method::GET,
            query: None,
            headers: HeaderMap::new(),
            input: Vec::new(),
            payload: None,
            timeout: Duration::from_secs(30),
            output: Some(output),
        }
    }

    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// Monotonic creation time, used for wait-duration diagnostics
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time elapsed since the call was built
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Take the output target out of the call (engine hand-off, dispatcher commit)
    pub fn take_output(&mut self) -> Option<ResponseCapture> {
        self.output.take()
    }

    /// Put an output target back on the call once execution finished
    pub fn set_output(&mut self, output: ResponseCapture) {
        self.output = Some(output);
    }

    #[must_use]
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Mutable access to the output target while it is attached
    pub fn output_mut(&mut self) -> Option<&mut ResponseCapture> {
        self.output.as_mut()
    }
}
