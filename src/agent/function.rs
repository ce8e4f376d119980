use crate::call::{Call, CallMode};
use crate::capture::ResponseCapture;
use crate::ids::CallId;
use http::{HeaderMap, Method};
use std::sync::Arc;

/// Everything a function gets to see about the call it serves
#[derive(Debug, Clone)]
pub struct Invocation {
    pub call_id: CallId,
    pub app: String,
    pub path: String,
    pub mode: CallMode,
    pub method: Method,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub input: Vec<u8>,
}

impl Invocation {
    /// Snapshot a call, moving its input bytes out
    pub(crate) fn take_from(call: &mut Call, input: Vec<u8>) -> Self {
        Self {
            call_id: call.id(),
            app: call.app().name.clone(),
            path: call.path().to_string(),
            mode: call.mode(),
            method: call.method.clone(),
            query: call.query.clone(),
            headers: std::mem::take(&mut call.headers),
            input,
        }
    }

    /// Request header as a string
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A registered function
///
/// Writes its output (headers, status, body) into the capture; an `Err` marks
/// the call as failed and the captured output is discarded.
pub type FunctionFn =
    Arc<dyn Fn(&Invocation, &mut ResponseCapture) -> Result<(), String> + Send + Sync>;
