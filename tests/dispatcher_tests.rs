#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Dispatcher and entry point tests against a scripted engine
//!
//! The stub agent runs its script inline on the calling thread, which keeps
//! every assertion about buffer accounting and header commits deterministic.

use fnrunner::agent::Agent;
use fnrunner::buffer_pool::{BufferPool, BufferPoolConfig};
use fnrunner::call::{App, Call, CallMode, InboundRequest, RequestContext};
use fnrunner::capture::ResponseCapture;
use fnrunner::dispatcher::{parse_wait, Dispatched, Dispatcher, WAIT_HEADER};
use fnrunner::error::{Error, Result};
use fnrunner::response::ResponseHead;
use fnrunner::runner::Runner;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Script = Box<dyn Fn(&Call, &mut ResponseCapture) -> Result<()> + Send + Sync>;

struct StubAgent {
    mode: CallMode,
    script: Script,
    executed: AtomicUsize,
    enqueued: Mutex<Vec<Call>>,
}

impl StubAgent {
    fn new(mode: CallMode, script: Script) -> Arc<Self> {
        Arc::new(Self {
            mode,
            script,
            executed: AtomicUsize::new(0),
            enqueued: Mutex::new(Vec::new()),
        })
    }
}

impl Agent for StubAgent {
    fn get_app_by_id(&self, app_id: &str) -> Result<App> {
        if app_id == "app-1" {
            Ok(app())
        } else {
            Err(Error::AppNotFound(app_id.to_string()))
        }
    }

    fn build_call(
        &self,
        mut output: ResponseCapture,
        app: &App,
        path: &str,
        req: &mut InboundRequest<'_>,
    ) -> Result<Call> {
        if path == "/missing" {
            return Err(Error::RouteNotFound {
                app: app.name.clone(),
                path: path.to_string(),
            });
        }
        if path == "/staged" {
            output
                .headers_mut()
                .insert("x-staged", HeaderValue::from_static("builder"));
        }
        let mut call = Call::new(app.clone(), path, self.mode, output);
        call.method = req.method.clone();
        if self.mode == CallMode::Sync {
            req.body
                .read_to_end(&mut call.input)
                .map_err(Error::InvalidPayload)?;
        }
        Ok(call)
    }

    fn enqueue(&self, call: Call) -> Result<()> {
        self.enqueued.lock().unwrap().push(call);
        Ok(())
    }

    fn submit(&self, call: &mut Call) -> Result<()> {
        let mut output = call.take_output().unwrap();
        self.executed.fetch_add(1, Ordering::SeqCst);
        (self.script)(call, &mut output)?;
        call.set_output(output);
        Ok(())
    }
}

fn app() -> App {
    App {
        id: "app-1".into(),
        name: "demo".into(),
    }
}

fn setup(agent: Arc<StubAgent>) -> (Dispatcher, Arc<BufferPool>) {
    let pool = BufferPool::new(BufferPoolConfig::default());
    (Dispatcher::new(agent, Arc::clone(&pool)), pool)
}

fn request<'a>(body: &'a mut dyn Read, content_length: Option<u64>) -> InboundRequest<'a> {
    InboundRequest {
        method: Method::POST,
        query: None,
        headers: HeaderMap::new(),
        content_length,
        body,
    }
}

fn script(f: impl Fn(&Call, &mut ResponseCapture) -> Result<()> + Send + Sync + 'static) -> Script {
    Box::new(f)
}

fn writes(body: &'static [u8]) -> Script {
    script(move |_, out| {
        out.write_all(body).unwrap();
        Ok(())
    })
}

fn dispatch_sync(
    dispatcher: &Dispatcher,
    sink: &mut ResponseHead,
) -> (Result<Dispatched>, RequestContext) {
    let mut ctx = RequestContext::new("app-1", "/fn");
    let mut body = io::empty();
    let mut req = request(&mut body, None);
    let result = dispatcher.dispatch(&app(), "/fn", &mut req, sink, &mut ctx);
    (result, ctx)
}

#[test]
fn test_sync_success_sets_length_and_type() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|_, out| {
            out.write_header(StatusCode::CREATED);
            out.headers_mut()
                .insert("x-fn", HeaderValue::from_static("yes"));
            out.write_all(b"<html><body>hi</body></html>").unwrap();
            Ok(())
        }),
    );
    let (dispatcher, pool) = setup(agent);
    let mut sink = ResponseHead::new(StatusCode::OK);
    sink.headers
        .insert("x-upstream", HeaderValue::from_static("kept"));

    let (result, ctx) = dispatch_sync(&dispatcher, &mut sink);
    let Dispatched::Completed(capture) = result.unwrap() else {
        panic!("expected a completed sync call");
    };

    assert!(ctx.call_id.is_some());
    assert_eq!(sink.status, StatusCode::CREATED);
    assert_eq!(sink.headers["x-fn"], "yes");
    assert_eq!(sink.headers["x-upstream"], "kept");
    assert_eq!(sink.headers[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(
        sink.headers[CONTENT_LENGTH],
        capture.len().to_string().as_str()
    );
    assert_eq!(capture.body(), b"<html><body>hi</body></html>");

    assert_eq!(pool.metrics().outstanding(), 1);
    drop(capture);
    assert_eq!(pool.metrics().outstanding(), 0);
    assert_eq!(pool.metrics().acquired(), pool.metrics().released());
}

#[test]
fn test_sync_json_object_detected() {
    let (dispatcher, _pool) = setup(StubAgent::new(CallMode::Sync, writes(br#"{"a":1}"#)));
    let mut sink = ResponseHead::new(StatusCode::OK);
    let (result, _) = dispatch_sync(&dispatcher, &mut sink);
    assert!(result.is_ok());
    assert_eq!(sink.headers[CONTENT_TYPE], "application/json; charset=utf-8");
    assert_eq!(sink.headers[CONTENT_LENGTH], "7");
    assert_eq!(sink.status, StatusCode::OK);
}

#[test]
fn test_sync_plain_text_sniffed() {
    let (dispatcher, _pool) = setup(StubAgent::new(CallMode::Sync, writes(b"hello world")));
    let mut sink = ResponseHead::new(StatusCode::OK);
    let (result, _) = dispatch_sync(&dispatcher, &mut sink);
    assert!(result.is_ok());
    assert_eq!(sink.headers[CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(sink.headers[CONTENT_LENGTH], "11");
}

#[test]
fn test_explicit_content_type_kept_and_length_overwritten() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|_, out| {
            out.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-custom"));
            out.headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
            out.write_all(b"{not json}").unwrap();
            Ok(())
        }),
    );
    let (dispatcher, _pool) = setup(agent);
    let mut sink = ResponseHead::new(StatusCode::OK);
    let (result, _) = dispatch_sync(&dispatcher, &mut sink);
    assert!(result.is_ok());
    assert_eq!(sink.headers[CONTENT_TYPE], "application/x-custom");
    assert_eq!(sink.headers[CONTENT_LENGTH], "10");
}

#[test]
fn test_timeout_adds_parseable_wait_header() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|_, out| {
            out.write_all(b"partial").unwrap();
            thread::sleep(Duration::from_millis(20));
            Err(Error::CallTimeout)
        }),
    );
    let (dispatcher, pool) = setup(agent);
    let mut sink = ResponseHead::new(StatusCode::OK);

    let (result, _) = dispatch_sync(&dispatcher, &mut sink);
    assert!(matches!(result, Err(Error::CallTimeout)));

    let wait = sink.headers[WAIT_HEADER].to_str().unwrap();
    let waited = parse_wait(wait).expect("wait header parses as a duration");
    assert!(waited >= Duration::from_millis(20), "{wait}");
    assert!(sink.headers.get(CONTENT_TYPE).is_none());
    assert!(sink.headers.get(CONTENT_LENGTH).is_none());
    assert_eq!(sink.status, StatusCode::OK);
    assert_eq!(pool.metrics().outstanding(), 0);
}

#[test]
fn test_busy_adds_wait_header() {
    let (dispatcher, pool) = setup(StubAgent::new(
        CallMode::Sync,
        script(|_, _| Err(Error::ServerBusy)),
    ));
    let mut sink = ResponseHead::new(StatusCode::OK);
    let (result, _) = dispatch_sync(&dispatcher, &mut sink);
    assert!(matches!(result, Err(Error::ServerBusy)));
    assert!(parse_wait(sink.headers[WAIT_HEADER].to_str().unwrap()).is_some());
    assert_eq!(pool.metrics().outstanding(), 0);
}

#[test]
fn test_generic_failure_leaves_sink_untouched() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|_, out| {
            out.write_header(StatusCode::IM_A_TEAPOT);
            out.headers_mut()
                .insert("x-partial", HeaderValue::from_static("1"));
            out.write_all(b"half").unwrap();
            Err(Error::FunctionFailed("boom".into()))
        }),
    );
    let (dispatcher, pool) = setup(agent);
    let mut sink = ResponseHead::new(StatusCode::OK);
    let (result, _) = dispatch_sync(&dispatcher, &mut sink);

    assert!(matches!(result, Err(Error::FunctionFailed(_))));
    assert!(sink.headers.is_empty());
    assert_eq!(sink.status, StatusCode::OK);
    assert_eq!(pool.metrics().outstanding(), 0);
}

#[test]
fn test_builder_error_propagates_unchanged() {
    let (dispatcher, pool) = setup(StubAgent::new(CallMode::Sync, writes(b"")));
    let mut sink = ResponseHead::new(StatusCode::OK);
    let mut ctx = RequestContext::new("app-1", "/missing");
    let mut body = io::empty();
    let mut req = request(&mut body, None);

    let result = dispatcher.dispatch(&app(), "/missing", &mut req, &mut sink, &mut ctx);
    assert!(matches!(result, Err(Error::RouteNotFound { .. })));
    assert!(ctx.call_id.is_none());
    assert!(sink.headers.is_empty());
    assert_eq!(pool.metrics().acquired(), 1);
    assert_eq!(pool.metrics().outstanding(), 0);
}

#[test]
fn test_async_returns_before_execution() {
    let agent = StubAgent::new(CallMode::Async, writes(b"never"));
    let (dispatcher, pool) = setup(Arc::clone(&agent));
    let mut sink = ResponseHead::new(StatusCode::OK);
    let mut ctx = RequestContext::new("app-1", "/fn");
    let payload = b"queued work".to_vec();
    let mut body = io::Cursor::new(payload.clone());
    let mut req = request(&mut body, Some(payload.len() as u64));

    let result = dispatcher.dispatch(&app(), "/fn", &mut req, &mut sink, &mut ctx);
    let Ok(Dispatched::Accepted(id)) = result else {
        panic!("expected an accepted async call");
    };

    assert_eq!(agent.executed.load(Ordering::SeqCst), 0);
    assert!(!id.to_string().is_empty());
    assert_eq!(ctx.call_id, Some(id));

    let enqueued = agent.enqueued.lock().unwrap();
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].id(), id);
    assert_eq!(enqueued[0].payload.as_deref(), Some(payload.as_slice()));
    assert!(!enqueued[0].has_output());

    // Body fully consumed, buffer already back
    assert_eq!(body.position(), payload.len() as u64);
    assert_eq!(pool.metrics().outstanding(), 0);
    assert!(sink.headers.is_empty());
}

struct BrokenBody;

impl Read for BrokenBody {
    fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))
    }
}

#[test]
fn test_async_payload_read_failure() {
    let agent = StubAgent::new(CallMode::Async, writes(b""));
    let (dispatcher, pool) = setup(Arc::clone(&agent));
    let mut sink = ResponseHead::new(StatusCode::OK);
    let mut ctx = RequestContext::new("app-1", "/fn");
    let mut body = BrokenBody;
    let mut req = request(&mut body, Some(10));

    let result = dispatcher.dispatch(&app(), "/fn", &mut req, &mut sink, &mut ctx);
    assert!(matches!(result, Err(Error::InvalidPayload(_))));
    assert!(agent.enqueued.lock().unwrap().is_empty());
    assert_eq!(pool.metrics().outstanding(), 0);
}

#[test]
fn test_concurrent_dispatches_never_mix_output() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|call, out| {
            for chunk in call.input.chunks(3) {
                out.write_all(chunk).unwrap();
                thread::yield_now();
            }
            Ok(())
        }),
    );
    let (dispatcher, pool) = setup(agent);
    let dispatcher = Arc::new(dispatcher);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                for round in 0..25 {
                    let expected = format!("caller-{i}-round-{round}-").repeat(i + 1);
                    let mut body = io::Cursor::new(expected.clone().into_bytes());
                    let mut req = request(&mut body, None);
                    let mut sink = ResponseHead::new(StatusCode::OK);
                    let mut ctx = RequestContext::new("app-1", "/fn");
                    let result = dispatcher.dispatch(&app(), "/fn", &mut req, &mut sink, &mut ctx);
                    let Ok(Dispatched::Completed(capture)) = result else {
                        panic!("sync call failed");
                    };
                    assert_eq!(capture.body(), expected.as_bytes());
                    assert_eq!(
                        sink.headers[CONTENT_LENGTH],
                        expected.len().to_string().as_str()
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.metrics().outstanding(), 0);
    assert_eq!(pool.metrics().acquired(), 400);
    assert_eq!(pool.metrics().acquired(), pool.metrics().released());
}

// Entry point

fn runner(agent: Arc<StubAgent>) -> Runner {
    let (dispatcher, _pool) = setup(agent);
    Runner::new(dispatcher)
}

#[test]
fn test_entry_point_async_ack() {
    let runner = runner(StubAgent::new(CallMode::Async, writes(b"")));
    let mut ctx = RequestContext::new("app-1", "fn");
    let mut body = io::Cursor::new(b"{}".to_vec());
    let reply = runner.handle_function_call(&mut ctx, request(&mut body, Some(2)));

    assert_eq!(reply.head.status, StatusCode::ACCEPTED);
    let json: serde_json::Value = serde_json::from_slice(reply.body_bytes()).unwrap();
    assert_eq!(
        json["call_id"].as_str().unwrap(),
        ctx.call_id.unwrap().to_string()
    );
}

#[test]
fn test_entry_point_sync_defaults_to_ok() {
    let runner = runner(StubAgent::new(CallMode::Sync, writes(b"hello world")));
    let mut ctx = RequestContext::new("app-1", "/fn");
    let mut body = io::empty();
    let reply = runner.handle_function_call(&mut ctx, request(&mut body, None));

    assert_eq!(reply.head.status, StatusCode::OK);
    assert_eq!(reply.body_bytes(), b"hello world");
    assert_eq!(reply.header("content-length"), Some("11"));
}

#[test]
fn test_entry_point_missing_app_id() {
    let runner = runner(StubAgent::new(CallMode::Sync, writes(b"")));
    let mut ctx = RequestContext::default();
    let mut body = io::empty();
    let reply = runner.handle_function_call(&mut ctx, request(&mut body, None));

    assert_eq!(reply.head.status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_slice(reply.body_bytes()).unwrap();
    assert!(json["error"]["message"].as_str().unwrap().contains("application id"));
}

#[test]
fn test_entry_point_unknown_app() {
    let runner = runner(StubAgent::new(CallMode::Sync, writes(b"")));
    let mut ctx = RequestContext::new("nope", "/fn");
    let mut body = io::empty();
    let reply = runner.handle_function_call(&mut ctx, request(&mut body, None));
    assert_eq!(reply.head.status, StatusCode::NOT_FOUND);
}

#[test]
fn test_entry_point_timeout_keeps_wait_header() {
    let runner = runner(StubAgent::new(
        CallMode::Sync,
        script(|_, _| Err(Error::CallTimeout)),
    ));
    let mut ctx = RequestContext::new("app-1", "/fn");
    let mut body = io::empty();
    let reply = runner.handle_function_call(&mut ctx, request(&mut body, None));

    assert_eq!(reply.head.status, StatusCode::GATEWAY_TIMEOUT);
    assert!(parse_wait(reply.header("xxx-fxlb-wait").unwrap()).is_some());
    let json: serde_json::Value = serde_json::from_slice(reply.body_bytes()).unwrap();
    assert_eq!(json["error"]["message"], "Timed out");
}

#[test]
fn test_entry_point_cleans_path() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|call, out| {
            out.write_all(call.path().as_bytes()).unwrap();
            Ok(())
        }),
    );
    let runner = runner(agent);
    let mut ctx = RequestContext::new("app-1", "a//b/./c/../d/");
    let mut body = io::empty();
    let reply = runner.handle_function_call(&mut ctx, request(&mut body, None));
    assert_eq!(reply.body_bytes(), b"/a/b/d");
}

fn dispatch_staged(dispatcher: &Dispatcher, sink: &mut ResponseHead) -> Result<Dispatched> {
    let mut ctx = RequestContext::new("app-1", "/staged");
    let mut body = io::Cursor::new(b"payload".to_vec());
    let mut req = request(&mut body, Some(7));
    dispatcher.dispatch(&app(), "/staged", &mut req, sink, &mut ctx)
}

#[test]
fn test_staged_headers_reach_async_ack() {
    let (dispatcher, _pool) = setup(StubAgent::new(CallMode::Async, writes(b"")));
    let mut sink = ResponseHead::new(StatusCode::OK);
    sink.headers
        .insert("x-upstream", HeaderValue::from_static("kept"));

    let result = dispatch_staged(&dispatcher, &mut sink);
    assert!(matches!(result, Ok(Dispatched::Accepted(_))));
    assert_eq!(sink.headers["x-staged"], "builder");
    assert_eq!(sink.headers["x-upstream"], "kept");
    assert!(sink.headers.get(CONTENT_LENGTH).is_none());
}

#[test]
fn test_staged_headers_survive_sync_failure_without_function_headers() {
    let agent = StubAgent::new(
        CallMode::Sync,
        script(|_, out| {
            out.headers_mut()
                .insert("x-partial", HeaderValue::from_static("1"));
            out.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
            Err(Error::CallTimeout)
        }),
    );
    let (dispatcher, pool) = setup(agent);
    let mut sink = ResponseHead::new(StatusCode::OK);

    let result = dispatch_staged(&dispatcher, &mut sink);
    assert!(matches!(result, Err(Error::CallTimeout)));
    assert_eq!(sink.headers["x-staged"], "builder");
    assert!(sink.headers.contains_key(WAIT_HEADER));
    assert!(sink.headers.get("x-partial").is_none());
    assert!(sink.headers.get(CONTENT_TYPE).is_none());
    assert_eq!(pool.metrics().outstanding(), 0);
}
