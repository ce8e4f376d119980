//! # Response Capture
//!
//! [`ResponseCapture`] stands in for the client-facing response while a
//! function runs. It offers the same contract (headers, status, body writes)
//! but nothing leaves the process until the dispatcher commits it:
//!
//! 1. **Staging** - the function mutates headers, records a status and writes
//!    body bytes into a pooled buffer.
//! 2. **Commit** - after the call succeeded, content negotiation fills in
//!    `Content-Type`/`Content-Length` and [`ResponseCapture::commit_head`]
//!    copies headers and status onto the real response head.
//!
//! A call that fails never reaches step 2, so a half-written body can never
//! be relayed.

use crate::buffer_pool::PooledBuffer;
use crate::response::ResponseHead;
use http::{HeaderMap, StatusCode};
use std::io::{self, Read};

/// Staging target for a synchronous call's output
#[derive(Debug)]
pub struct ResponseCapture {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: PooledBuffer,
}

impl ResponseCapture {
    /// Wrap a checked-out buffer, seeding the header map with the real
    /// response's current headers.
    #[must_use]
    pub fn new(body: PooledBuffer, headers: HeaderMap) -> Self {
        Self {
            headers,
            status: None,
            body,
        }
    }

    /// Capture backed by a buffer outside any pool (async executions)
    #[must_use]
    pub fn detached() -> Self {
        Self::new(PooledBuffer::unpooled(), HeaderMap::new())
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Record the status; it is only emitted at commit.
    pub fn write_header(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Recorded status, `None` when the function never set one
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Buffered body bytes
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Raw access to the underlying buffer
    pub fn buffer_mut(&mut self) -> &mut PooledBuffer {
        &mut self.body
    }

    /// Number of buffered body bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Copy headers and the recorded status onto the real response head.
    ///
    /// The capture's header map started as a copy of `head.headers`, so it
    /// replaces them wholesale. Without a recorded status the head keeps the
    /// status it already has.
    pub fn commit_head(&self, head: &mut ResponseHead) {
        head.headers.clone_from(&self.headers);
        if let Some(status) = self.status {
            head.status = status;
        }
    }

    /// Turn the capture into a reader over its body.
    ///
    /// The pooled buffer travels with the reader and goes back to the pool
    /// when the reader is dropped, after the body has been relayed.
    #[must_use]
    pub fn into_reader(self) -> CaptureReader {
        CaptureReader {
            body: self.body,
            pos: 0,
        }
    }
}

impl io::Write for ResponseCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reader over a committed capture's body
#[derive(Debug)]
pub struct CaptureReader {
    body: PooledBuffer,
    pos: usize,
}

impl CaptureReader {
    /// Bytes not yet read
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.body[self.pos..]
    }

    /// Total body length
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl Read for CaptureReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.body[self.pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}
