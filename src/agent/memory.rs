use super::function::{FunctionFn, Invocation};
use super::worker_pool::{Job, Rejected, WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};
use super::{Agent, AppDirectory};
use crate::call::{App, Call, CallMode, InboundRequest};
use crate::capture::ResponseCapture;
use crate::error::{Error, Result};
use crate::ids::new_app_id;
use crate::runner::clean_path;
use dashmap::DashMap;
use http::header::HeaderValue;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the call id on both the function's request and the reply
pub const CALL_ID_HEADER: &str = "fn-call-id";

/// Upper bound on what a declared `Content-Length` may pre-allocate for sync input
const MAX_INPUT_RESERVE: usize = 1024 * 1024;

/// A function bound to a path of an application
#[derive(Clone)]
pub struct Route {
    pub mode: CallMode,
    pub timeout: Duration,
    pub function: FunctionFn,
}

impl Route {
    #[must_use]
    pub fn new(mode: CallMode, timeout: Duration, function: FunctionFn) -> Self {
        Self {
            mode,
            timeout,
            function,
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// In-process execution engine
///
/// Applications and routes live in concurrent maps; sync calls run on one
/// coroutine pool and async calls on another, so a flood of queued work
/// never starves requests that are waiting for an answer.
pub struct MemoryAgent {
    apps: DashMap<String, App>,
    app_ids_by_name: DashMap<String, String>,
    routes: DashMap<(String, String), Arc<Route>>,
    sync_pool: WorkerPool,
    async_pool: WorkerPool,
}

impl MemoryAgent {
    #[must_use]
    pub fn new(sync_config: WorkerPoolConfig, async_config: WorkerPoolConfig) -> Self {
        Self {
            apps: DashMap::new(),
            app_ids_by_name: DashMap::new(),
            routes: DashMap::new(),
            sync_pool: WorkerPool::new("sync", sync_config),
            async_pool: WorkerPool::new("async", async_config),
        }
    }

    /// Register an application, returning the existing one if the name is taken
    pub fn register_app(&self, name: &str) -> App {
        let id = self
            .app_ids_by_name
            .entry(name.to_string())
            .or_insert_with(new_app_id)
            .clone();
        let app = self
            .apps
            .entry(id.clone())
            .or_insert_with(|| App {
                id,
                name: name.to_string(),
            })
            .clone();
        info!(app_id = %app.id, app_name = %app.name, "App registered");
        app
    }

    /// Bind a function to a path of an application, replacing any previous binding
    pub fn register_route(&self, app_id: &str, path: &str, route: Route) -> Result<()> {
        if !self.apps.contains_key(app_id) {
            return Err(Error::AppNotFound(app_id.to_string()));
        }
        let path = clean_path(path);
        info!(
            app_id = %app_id,
            path = %path,
            mode = %route.mode,
            timeout_ms = route.timeout.as_millis() as u64,
            "Route registered"
        );
        if self
            .routes
            .insert((app_id.to_string(), path.clone()), Arc::new(route))
            .is_some()
        {
            warn!(app_id = %app_id, path = %path, "Replaced existing route");
        }
        Ok(())
    }

    /// Metrics of the sync worker pool
    #[must_use]
    pub fn sync_metrics(&self) -> &Arc<WorkerPoolMetrics> {
        self.sync_pool.metrics()
    }

    /// Metrics of the async worker pool
    #[must_use]
    pub fn async_metrics(&self) -> &Arc<WorkerPoolMetrics> {
        self.async_pool.metrics()
    }

    fn route(&self, app: &App, path: &str) -> Result<Arc<Route>> {
        self.routes
            .get(&(app.id.clone(), path.to_string()))
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| Error::RouteNotFound {
                app: app.name.clone(),
                path: path.to_string(),
            })
    }
}

impl AppDirectory for MemoryAgent {
    fn app_id_by_name(&self, name: &str) -> Option<String> {
        self.app_ids_by_name.get(name).map(|id| id.value().clone())
    }
}

impl Agent for MemoryAgent {
    fn get_app_by_id(&self, app_id: &str) -> Result<App> {
        self.apps
            .get(app_id)
            .map(|app| app.value().clone())
            .ok_or_else(|| Error::AppNotFound(app_id.to_string()))
    }

    fn build_call(
        &self,
        mut output: ResponseCapture,
        app: &App,
        path: &str,
        req: &mut InboundRequest<'_>,
    ) -> Result<Call> {
        let route = self.route(app, path)?;

        let id = crate::ids::CallId::new();
        let id_value = HeaderValue::from_str(&id.to_string())
            .map_err(|e| Error::Internal(format!("call id is not a header value: {e}")))?;
        output
            .headers_mut()
            .insert(CALL_ID_HEADER, id_value.clone());

        let mut call = Call::with_id(id, app.clone(), path, route.mode, output);
        call.method = req.method.clone();
        call.query = req.query.clone();
        call.timeout = route.timeout;
        call.headers = req.headers.clone();
        call.headers.insert(CALL_ID_HEADER, id_value);

        // Async payloads are read by the dispatcher; sync input is read here
        if route.mode == CallMode::Sync {
            if let Some(len) = req.content_length {
                // Declared length is client input; the read grows past the hint as needed
                let hint = usize::try_from(len)
                    .unwrap_or(usize::MAX)
                    .min(MAX_INPUT_RESERVE);
                call.input.reserve(hint);
            }
            req.body
                .read_to_end(&mut call.input)
                .map_err(Error::InvalidPayload)?;
        }

        debug!(
            call_id = %call.id(),
            app_id = %app.id,
            path = %path,
            mode = %call.mode(),
            input_bytes = call.input.len(),
            "Call built"
        );
        Ok(call)
    }

    fn enqueue(&self, mut call: Call) -> Result<()> {
        let route = self.route(call.app(), call.path())?;
        let payload = call.payload.take().unwrap_or_default();
        drop(call.take_output());
        let call_id = call.id();

        let job = Job {
            invocation: Invocation::take_from(&mut call, payload),
            function: Arc::clone(&route.function),
            output: ResponseCapture::detached(),
            reply: None,
        };

        match self.async_pool.dispatch(job) {
            Ok(()) => {
                info!(call_id = %call_id, path = %call.path(), "Call enqueued");
                Ok(())
            }
            Err(Rejected::Full) => Err(Error::QueueFull),
            Err(Rejected::Closed) => Err(Error::Internal("async workers are gone".into())),
        }
    }

    fn submit(&self, call: &mut Call) -> Result<()> {
        let route = self.route(call.app(), call.path())?;
        let output = call
            .take_output()
            .ok_or_else(|| Error::Internal("sync call has no output target".into()))?;
        let input = std::mem::take(&mut call.input);
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();

        let job = Job {
            invocation: Invocation::take_from(call, input),
            function: Arc::clone(&route.function),
            output,
            reply: Some(reply_tx),
        };

        match self.sync_pool.dispatch(job) {
            Ok(()) => {}
            Err(Rejected::Full) => return Err(Error::ServerBusy),
            Err(Rejected::Closed) => {
                return Err(Error::Internal("sync workers are gone".into()))
            }
        }

        let remaining = call.timeout.saturating_sub(call.elapsed());
        match reply_rx.recv_timeout(remaining) {
            Ok(outcome) => {
                call.set_output(outcome.output);
                outcome.result.map_err(Error::FunctionFailed)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    call_id = %call.id(),
                    timeout_ms = call.timeout.as_millis() as u64,
                    "Call timed out"
                );
                Err(Error::CallTimeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::FunctionFailed(
                "worker exited without a reply".into(),
            )),
        }
    }
}
