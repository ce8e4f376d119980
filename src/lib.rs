//! # fnrunner
//!
//! **fnrunner** executes user functions behind an HTTP entry point. A call
//! is either *sync* (the client waits for the function's output) or *async*
//! (the client gets a call id back and the function runs later).
//!
//! ## Architecture
//!
//! - **[`server`]** - `tiny_http` listener, `/health`, `/metrics` and the
//!   `/r/{app}/{path..}` function route
//! - **[`runner`]** - request entry point: resolves the application, maps
//!   errors to JSON responses
//! - **[`dispatcher`]** - branches on the call mode, captures sync output
//!   and commits it to the real response only on success
//! - **[`capture`]** / **[`negotiate`]** / **[`sniff`]** - the response shim,
//!   post-execution content negotiation and MIME sniffing
//! - **[`buffer_pool`]** - reusable output buffers with RAII release
//! - **[`agent`]** - the execution engine contract and the in-process
//!   [`MemoryAgent`](agent::MemoryAgent) running functions on `may` coroutines
//! - **[`config`]** / **[`logging`]** - environment and YAML configuration,
//!   structured `tracing` output
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as HttpServer<br/>(tiny_http)
//!     participant Runner
//!     participant Dispatcher
//!     participant Pool as BufferPool
//!     participant Agent as MemoryAgent
//!     participant Worker as Worker<br/>(may coroutine)
//!
//!     Client->>Server: POST /r/demo/hello
//!     Server->>Server: resolve app name to id
//!     Server->>Runner: handle_function_call(ctx, request)
//!     Runner->>Agent: get_app_by_id
//!     Runner->>Dispatcher: dispatch(app, path)
//!     Dispatcher->>Pool: acquire()
//!     Dispatcher->>Agent: build_call(capture)
//!
//!     alt async
//!         Dispatcher->>Dispatcher: read body into payload
//!         Dispatcher->>Agent: enqueue(call)
//!         Runner-->>Client: 202 {"call_id": ...}
//!     else sync
//!         Dispatcher->>Agent: submit(call)
//!         Agent->>Worker: job
//!         Worker-->>Agent: capture + result
//!         alt timeout or busy
//!             Runner-->>Client: 504/503 + XXX-FXLB-WAIT
//!         else success
//!             Dispatcher->>Dispatcher: negotiate + commit head
//!             Runner-->>Client: status, headers, buffered body
//!         end
//!     end
//! ```

pub mod agent;
pub mod buffer_pool;
pub mod call;
pub mod capture;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod logging;
pub mod negotiate;
pub mod response;
pub mod runner;
pub mod server;
pub mod sniff;

pub use error::{Error, Result};
