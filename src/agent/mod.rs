//! # Agent Module
//!
//! The execution engine seen from the dispatcher. The dispatcher never runs
//! functions itself; it consumes four operations through [`Agent`]:
//!
//! - resolve an application by id
//! - build a [`Call`] from a request, wiring the output target
//! - run a sync call, blocking until it finishes, fails or times out
//! - enqueue an async call and return as soon as it is accepted
//!
//! [`MemoryAgent`] is the in-process engine shipped with the crate: routes
//! are registered Rust functions executed on `may` coroutine worker pools.

pub mod builtin;
mod function;
mod memory;
pub mod worker_pool;

pub use function::{FunctionFn, Invocation};
pub use memory::{MemoryAgent, Route};

use crate::call::{App, Call, InboundRequest};
use crate::capture::ResponseCapture;
use crate::error::Result;

/// Operations the dispatcher needs from the execution engine
///
/// Errors are returned as crate [`Error`](crate::error::Error)s and passed
/// through the dispatcher unchanged. `submit` must report timeouts as
/// `CallTimeout` and capacity rejections as `ServerBusy`.
pub trait Agent: Send + Sync {
    /// Look up an application by id
    fn get_app_by_id(&self, app_id: &str) -> Result<App>;

    /// Turn a request into a call whose output goes to `output`.
    ///
    /// Must assign the call id before returning.
    fn build_call(
        &self,
        output: ResponseCapture,
        app: &App,
        path: &str,
        req: &mut InboundRequest<'_>,
    ) -> Result<Call>;

    /// Accept an async call for deferred execution
    fn enqueue(&self, call: Call) -> Result<()>;

    /// Run a sync call to completion.
    ///
    /// On success the output target is attached to the call again.
    fn submit(&self, call: &mut Call) -> Result<()>;
}

/// Name to id lookup used by the router in front of the entry point
pub trait AppDirectory: Send + Sync {
    fn app_id_by_name(&self, name: &str) -> Option<String>;
}
