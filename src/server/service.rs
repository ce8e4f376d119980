use super::errors::error_body;
use crate::agent::worker_pool::WorkerPoolMetrics;
use crate::agent::AppDirectory;
use crate::buffer_pool::BufferPool;
use crate::call::{InboundRequest, RequestContext};
use crate::error::Error;
use crate::response::{HttpReply, ReplyBody, ResponseHead};
use crate::runner::{json_reply, Runner};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

/// Prefix under which applications expose their functions: `/r/{app}/{path..}`
pub const ROUTE_PREFIX: &str = "/r/";

/// A request as handed over by the listener
pub struct IncomingRequest<'a> {
    pub method: Method,
    /// Raw request target, path plus optional query
    pub url: &'a str,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: &'a mut dyn Read,
}

/// Routes listener requests to health, metrics and the function entry point
pub struct AppService {
    runner: Arc<Runner>,
    directory: Arc<dyn AppDirectory>,
    pool_metrics: Vec<(String, Arc<WorkerPoolMetrics>)>,
}

impl AppService {
    pub fn new(runner: Arc<Runner>, directory: Arc<dyn AppDirectory>) -> Self {
        Self {
            runner,
            directory,
            pool_metrics: Vec::new(),
        }
    }

    /// Publish a worker pool's counters on `/metrics` under `pool="<name>"`
    pub fn register_pool_metrics(&mut self, name: &str, metrics: Arc<WorkerPoolMetrics>) {
        self.pool_metrics.push((name.to_string(), metrics));
    }

    pub fn handle(&self, req: IncomingRequest<'_>) -> HttpReply {
        let (path, query) = match req.url.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (req.url, None),
        };

        if req.method == Method::GET && path == "/health" {
            return health_endpoint();
        }
        if req.method == Method::GET && path == "/metrics" {
            return metrics_endpoint(self.runner.dispatcher().pool(), &self.pool_metrics);
        }

        let Some(rest) = path.strip_prefix(ROUTE_PREFIX) else {
            return not_found(&req.method, path);
        };
        let (app_name, fn_path) = match rest.split_once('/') {
            Some((app, fn_path)) => (app, format!("/{fn_path}")),
            None => (rest, "/".to_string()),
        };
        if app_name.is_empty() {
            return not_found(&req.method, path);
        }

        let Some(app_id) = self.directory.app_id_by_name(app_name) else {
            return json_reply(
                ResponseHead::new(StatusCode::NOT_FOUND),
                &error_body(&Error::AppNotFound(app_name.to_string()).to_string()),
            );
        };

        debug!(app = %app_name, app_id = %app_id, path = %fn_path, "Function route matched");
        let mut ctx = RequestContext::new(app_id, fn_path);
        let inbound = InboundRequest {
            method: req.method,
            query,
            headers: req.headers,
            content_length: req.content_length,
            body: req.body,
        };
        self.runner.handle_function_call(&mut ctx, inbound)
    }
}

/// Basic health check endpoint returning `{ "status": "ok" }`.
pub fn health_endpoint() -> HttpReply {
    json_reply(ResponseHead::new(StatusCode::OK), &json!({ "status": "ok" }))
}

/// Metrics endpoint returning Prometheus text format statistics.
pub fn metrics_endpoint(
    pool: &BufferPool,
    worker_pools: &[(String, Arc<WorkerPoolMetrics>)],
) -> HttpReply {
    let m = pool.metrics();
    let mut body = format!(
        "# HELP fnrunner_buffers_acquired_total Buffers checked out of the pool\n\
         # TYPE fnrunner_buffers_acquired_total counter\n\
         fnrunner_buffers_acquired_total {}\n\
         # HELP fnrunner_buffers_released_total Buffers returned to the pool\n\
         # TYPE fnrunner_buffers_released_total counter\n\
         fnrunner_buffers_released_total {}\n\
         # HELP fnrunner_buffers_allocated_total Buffers allocated because the free list was empty\n\
         # TYPE fnrunner_buffers_allocated_total counter\n\
         fnrunner_buffers_allocated_total {}\n\
         # HELP fnrunner_buffers_discarded_total Returned buffers dropped instead of pooled\n\
         # TYPE fnrunner_buffers_discarded_total counter\n\
         fnrunner_buffers_discarded_total {}\n\
         # HELP fnrunner_buffers_outstanding Buffers currently checked out\n\
         # TYPE fnrunner_buffers_outstanding gauge\n\
         fnrunner_buffers_outstanding {}\n\
         # HELP fnrunner_buffers_idle Buffers waiting on the free list\n\
         # TYPE fnrunner_buffers_idle gauge\n\
         fnrunner_buffers_idle {}\n",
        m.acquired(),
        m.released(),
        m.allocated(),
        m.discarded(),
        m.outstanding(),
        pool.idle(),
    );

    push_pool_family(
        &mut body,
        "fnrunner_worker_queue_depth",
        "Jobs accepted and not yet completed",
        "gauge",
        worker_pools,
        |w| w.get_queue_depth() as u64,
    );
    push_pool_family(
        &mut body,
        "fnrunner_worker_dispatched_total",
        "Jobs accepted by the pool",
        "counter",
        worker_pools,
        WorkerPoolMetrics::get_dispatched_count,
    );
    push_pool_family(
        &mut body,
        "fnrunner_worker_completed_total",
        "Jobs finished",
        "counter",
        worker_pools,
        WorkerPoolMetrics::get_completed_count,
    );
    push_pool_family(
        &mut body,
        "fnrunner_worker_shed_total",
        "Jobs rejected because the pool was full",
        "counter",
        worker_pools,
        WorkerPoolMetrics::get_shed_count,
    );

    let mut head = ResponseHead::new(StatusCode::OK);
    head.headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    HttpReply {
        head,
        body: ReplyBody::Bytes(body.into_bytes()),
    }
}

/// One labelled sample per worker pool
fn push_pool_family(
    body: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    worker_pools: &[(String, Arc<WorkerPoolMetrics>)],
    value: impl Fn(&WorkerPoolMetrics) -> u64,
) {
    if worker_pools.is_empty() {
        return;
    }
    body.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n"));
    for (pool, metrics) in worker_pools {
        body.push_str(&format!("{name}{{pool=\"{pool}\"}} {}\n", value(metrics.as_ref())));
    }
}

fn not_found(method: &Method, path: &str) -> HttpReply {
    json_reply(
        ResponseHead::new(StatusCode::NOT_FOUND),
        &json!({
            "error": { "message": "Not Found" },
            "method": method.as_str(),
            "path": path
        }),
    )
}
