pub mod errors;
pub mod http_server;
pub mod service;

pub use errors::error_response;
pub use http_server::{HttpServer, ServerHandle};
pub use service::{health_endpoint, metrics_endpoint, AppService, IncomingRequest};
