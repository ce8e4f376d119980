//! # Dispatcher Module
//!
//! The execution dispatcher sits between the entry point and the execution
//! engine. For every request it:
//!
//! - checks a buffer out of the [`BufferPool`](crate::buffer_pool::BufferPool)
//! - asks the [`Agent`](crate::agent::Agent) to build a call whose output goes
//!   into a [`ResponseCapture`](crate::capture::ResponseCapture) over that buffer
//! - branches on the call's mode
//!
//! ## Async calls
//!
//! The request body is read into the pooled buffer, copied into the call's
//! payload, the staged headers are copied to the real response, the buffer
//! goes back to the pool and the call is enqueued. The caller gets
//! [`Dispatched::Accepted`] with the call id.
//!
//! ## Sync calls
//!
//! The call is submitted and the handling thread blocks until the function
//! finishes, fails or times out:
//!
//! - **timeout / busy**: the real response gets an `XXX-FXLB-WAIT` header
//!   with the time spent since the call was built, then the error is returned
//! - **other failures**: returned unchanged
//! - **success**: content negotiation runs over the capture, its headers and
//!   status are committed to the real response and the capture is returned in
//!   [`Dispatched::Completed`] for relay
//!
//! Headers the call builder staged (the call id, for instance) reach the
//! real response on every path. A failed call commits nothing the function
//! wrote, so partial function output cannot reach the client.

mod core;
mod wait;

pub use core::{Dispatched, Dispatcher, WAIT_HEADER};
pub use wait::{format_wait, parse_wait};
