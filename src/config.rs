//! # Configuration Module
//!
//! Two sources feed the runner at startup:
//!
//! - [`RuntimeConfig::from_env`] - tuning knobs from `FNR_*` environment
//!   variables (listener threads, buffer pool, worker pools, stack size)
//! - [`AppsConfig::load`] - a YAML file declaring applications and the
//!   built-in functions bound to their paths
//!
//! ```yaml
//! apps:
//!   - name: demo
//!     routes:
//!       - path: /hello
//!         type: sync
//!         function: { kind: static, body: "hello world" }
//!       - path: /jobs
//!         type: async
//!         timeout_ms: 60000
//!         function: { kind: echo }
//! ```
//!
//! `FNR_STACK_SIZE` accepts decimal (`65536`) or hexadecimal (`0x10000`).

use crate::agent::builtin::Builtin;
use crate::agent::worker_pool::WorkerPoolConfig;
use crate::agent::{MemoryAgent, Route};
use crate::buffer_pool::BufferPoolConfig;
use crate::call::CallMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Listener threads (`FNR_HTTP_THREADS`, default 4)
    pub http_threads: usize,
    pub buffer_pool: BufferPoolConfig,
    /// `FNR_SYNC_WORKERS` (8) / `FNR_SYNC_QUEUE_BOUND` (256)
    pub sync_pool: WorkerPoolConfig,
    /// `FNR_ASYNC_WORKERS` (4) / `FNR_ASYNC_QUEUE_BOUND` (1024)
    pub async_pool: WorkerPoolConfig,
    /// Timeout for routes that do not declare one (`FNR_DEFAULT_TIMEOUT_MS`, 30000)
    pub default_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http_threads: 4,
            buffer_pool: BufferPoolConfig::default(),
            sync_pool: WorkerPoolConfig::new(8, 256, DEFAULT_STACK_SIZE),
            async_pool: WorkerPoolConfig::new(4, 1024, DEFAULT_STACK_SIZE),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stack_size = match env::var("FNR_STACK_SIZE") {
            Ok(val) => parse_size(&val).unwrap_or(DEFAULT_STACK_SIZE),
            Err(_) => DEFAULT_STACK_SIZE,
        };
        Self {
            http_threads: env_parse("FNR_HTTP_THREADS").unwrap_or(defaults.http_threads),
            buffer_pool: BufferPoolConfig::from_env(),
            sync_pool: WorkerPoolConfig::new(
                env_parse("FNR_SYNC_WORKERS").unwrap_or(defaults.sync_pool.num_workers),
                env_parse("FNR_SYNC_QUEUE_BOUND").unwrap_or(defaults.sync_pool.queue_bound),
                stack_size,
            ),
            async_pool: WorkerPoolConfig::new(
                env_parse("FNR_ASYNC_WORKERS").unwrap_or(defaults.async_pool.num_workers),
                env_parse("FNR_ASYNC_QUEUE_BOUND").unwrap_or(defaults.async_pool.queue_bound),
                stack_size,
            ),
            default_timeout: env_parse("FNR_DEFAULT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse a byte size written in decimal or `0x` hexadecimal
pub fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

/// Applications file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppsConfig {
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    pub path: String,
    #[serde(rename = "type", default = "default_mode")]
    pub mode: CallMode,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub function: Builtin,
}

fn default_mode() -> CallMode {
    CallMode::Sync
}

impl AppsConfig {
    /// Read and parse an applications file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid apps document.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read apps file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid apps file {}", path.display()))
    }

    /// Parse an applications document
    ///
    /// # Errors
    ///
    /// Fails on YAML errors and duplicate application names.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        let mut seen = std::collections::HashSet::new();
        for app in &config.apps {
            if !seen.insert(app.name.as_str()) {
                anyhow::bail!("application '{}' declared twice", app.name);
            }
        }
        Ok(config)
    }

    /// Register every application and route on the engine
    ///
    /// # Errors
    ///
    /// Fails on a function declaration that cannot be built.
    pub fn install(&self, agent: &MemoryAgent, default_timeout: Duration) -> Result<()> {
        for app_cfg in &self.apps {
            let app = agent.register_app(&app_cfg.name);
            for route in &app_cfg.routes {
                let function = route.function.clone().into_function().with_context(|| {
                    format!("app '{}' route '{}'", app_cfg.name, route.path)
                })?;
                let timeout = route
                    .timeout_ms
                    .map_or(default_timeout, Duration::from_millis);
                agent.register_route(
                    &app.id,
                    &route.path,
                    Route::new(route.mode, timeout, function),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("65536"), Some(65536));
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size(" 0X10 "), Some(16));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_runtime_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.http_threads, 4);
        assert_eq!(config.sync_pool.capacity(), 264);
        assert_eq!(config.async_pool.capacity(), 1028);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_route_defaults_to_sync() {
        let config = AppsConfig::parse(
            "apps:\n  - name: demo\n    routes:\n      - path: /x\n        function: { kind: echo }\n",
        )
        .unwrap();
        let route = &config.apps[0].routes[0];
        assert_eq!(route.mode, CallMode::Sync);
        assert_eq!(route.timeout_ms, None);
        assert_eq!(route.function, Builtin::Echo);
    }

    #[test]
    fn test_duplicate_app_rejected() {
        let err = AppsConfig::parse("apps:\n  - name: a\n  - name: a\n").unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }
}
