//! Client-facing response types: the real sink's head and the final reply
//! the listener writes to the network.

use crate::capture::CaptureReader;
use http::{HeaderMap, StatusCode};

/// Status line and headers of the real, client-facing response
///
/// Nothing here has been sent yet; the listener writes it together with the
/// body once the entry point has produced an [`HttpReply`].
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

impl Default for ResponseHead {
    /// Routers start out with "not found" until a handler claims the request.
    fn default() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }
}

/// Body of a finished reply
#[derive(Debug)]
pub enum ReplyBody {
    Empty,
    /// Small body produced in-process (acks, errors, metrics)
    Bytes(Vec<u8>),
    /// Function output still held in its pooled buffer
    Buffered(CaptureReader),
}

impl ReplyBody {
    /// Body length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ReplyBody::Empty => 0,
            ReplyBody::Bytes(bytes) => bytes.len(),
            ReplyBody::Buffered(reader) => reader.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One complete, well-formed response
#[derive(Debug)]
pub struct HttpReply {
    pub head: ResponseHead,
    pub body: ReplyBody,
}

impl HttpReply {
    /// Body bytes as a contiguous slice
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        match &self.body {
            ReplyBody::Empty => &[],
            ReplyBody::Bytes(bytes) => bytes,
            ReplyBody::Buffered(reader) => reader.remaining(),
        }
    }

    /// Header value as a string, if present and valid UTF-8
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
