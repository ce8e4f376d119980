use super::service::{AppService, IncomingRequest};
use crate::agent::worker_pool::panic_message;
use crate::response::{HttpReply, ReplyBody, ResponseHead};
use crate::runner::json_reply;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use http::{HeaderMap, Method, StatusCode};
use serde_json::json;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often idle listener threads check for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP listener in front of an [`AppService`]
///
/// Each listener thread pulls requests off a shared `tiny_http` server and
/// handles them to completion, so a blocked sync call occupies exactly one
/// thread.
pub struct HttpServer(pub AppService);

/// Handle to a running HTTP server
///
/// Provides methods for waiting until the server is ready, stopping it gracefully,
/// or joining the listener threads.
pub struct ServerHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is bound to (resolves port `0`)
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready to accept connections
    ///
    /// Polls the server address by attempting TCP connections until successful.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` error if the server doesn't become ready within ~250ms (50 attempts × 5ms).
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop the server gracefully
    ///
    /// Listener threads finish the request they are serving and exit.
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.join().is_err() {
            warn!("A listener thread panicked during shutdown");
        }
    }

    /// Wait for every listener thread to complete
    ///
    /// # Errors
    ///
    /// Returns an error if a listener thread panicked.
    pub fn join(self) -> thread::Result<()> {
        let mut outcome = Ok(());
        for worker in self.workers {
            if let Err(e) = worker.join() {
                outcome = Err(e);
            }
        }
        outcome
    }
}

impl HttpServer {
    /// Start the HTTP server on the given address with `threads` listener threads
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A, threads: usize) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let server = tiny_http::Server::http(addr).map_err(|e| io::Error::other(e.to_string()))?;
        let addr = server.server_addr().to_ip().unwrap_or(addr);

        let server = Arc::new(server);
        let service = Arc::new(self.0);
        let running = Arc::new(AtomicBool::new(true));
        let threads = threads.max(1);

        info!(addr = %addr, threads, "HTTP server listening");

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let server = Arc::clone(&server);
            let service = Arc::clone(&service);
            let running = Arc::clone(&running);
            let worker = thread::Builder::new()
                .name(format!("fnrunner-http-{worker_id}"))
                .spawn(move || listen(worker_id, &server, &service, &running))?;
            workers.push(worker);
        }

        Ok(ServerHandle {
            addr,
            running,
            workers,
        })
    }
}

fn listen(worker_id: usize, server: &tiny_http::Server, service: &AppService, running: &AtomicBool) {
    debug!(worker_id, "Listener thread started");
    while running.load(Ordering::SeqCst) {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => serve_one(service, request),
            Ok(None) => {}
            Err(e) => {
                error!(worker_id, error = %e, "Listener failed to receive request");
                break;
            }
        }
    }
    debug!(worker_id, "Listener thread exiting");
}

fn serve_one(service: &AppService, mut request: tiny_http::Request) {
    let url = request.url().to_string();
    let reply = match Method::from_bytes(request.method().to_string().as_bytes()) {
        Ok(method) => {
            let headers = convert_headers(request.headers());
            let content_length = request
                .body_length()
                .and_then(|n| u64::try_from(n).ok());
            let body = request.as_reader();
            guarded(&url, || {
                service.handle(IncomingRequest {
                    method,
                    url: &url,
                    headers,
                    content_length,
                    body,
                })
            })
        }
        Err(_) => json_reply(
            ResponseHead::new(StatusCode::BAD_REQUEST),
            &json!({ "error": { "message": "Unsupported method" } }),
        ),
    };

    if let Err(e) = respond(request, reply) {
        debug!(url = %url, error = %e, "Client went away before the reply was written");
    }
}

/// Run a handler, turning a panic into a 500 so the listener thread and the
/// pending `tiny_http` request survive it.
fn guarded(url: &str, handle: impl FnOnce() -> HttpReply) -> HttpReply {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(handle)) {
        Ok(reply) => reply,
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(url = %url, panic_message = %message, "Request handler panicked");
            json_reply(
                ResponseHead::new(StatusCode::INTERNAL_SERVER_ERROR),
                &json!({ "error": { "message": "Internal server error" } }),
            )
        }
    }
}

fn convert_headers(raw: &[tiny_http::Header]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for h in raw {
        let name = HeaderName::from_bytes(h.field.as_str().as_bytes());
        let value = HeaderValue::from_bytes(h.value.as_bytes());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %h.field, "Skipping malformed request header"),
        }
    }
    headers
}

/// Write the reply; the buffered body streams straight out of its pooled
/// buffer, which goes back to the pool once tiny_http drops the reader.
fn respond(request: tiny_http::Request, reply: HttpReply) -> io::Result<()> {
    let HttpReply { head, body } = reply;
    let status = tiny_http::StatusCode(head.status.as_u16());
    let len = body.len();

    let mut headers = Vec::with_capacity(head.headers.len());
    for (name, value) in &head.headers {
        // tiny_http derives Content-Length from the data length
        if *name == CONTENT_LENGTH {
            continue;
        }
        match tiny_http::Header::from_bytes(name.as_str().as_bytes(), value.as_bytes()) {
            Ok(header) => headers.push(header),
            Err(()) => warn!(header = %name, "Dropping reply header tiny_http rejects"),
        }
    }

    match body {
        ReplyBody::Empty => request.respond(fixed_length(status, headers, io::empty(), 0)),
        ReplyBody::Bytes(bytes) => {
            request.respond(fixed_length(status, headers, io::Cursor::new(bytes), len))
        }
        ReplyBody::Buffered(reader) => request.respond(fixed_length(status, headers, reader, len)),
    }
}

/// Response with an exact `Content-Length`; tiny_http would otherwise switch
/// large bodies to chunked encoding.
fn fixed_length<R: io::Read>(
    status: tiny_http::StatusCode,
    headers: Vec<tiny_http::Header>,
    data: R,
    len: usize,
) -> tiny_http::Response<R> {
    tiny_http::Response::new(status, headers, data, Some(len), None)
        .with_chunked_threshold(usize::MAX)
}
