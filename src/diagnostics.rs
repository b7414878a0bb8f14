//! Diagnostics agents: a process-inspection listener and a runtime-stats listener, each optional.
//!
//! `start` succeeds at most once per `Diagnostics`; `stop` is safe whether or not `start` ran.

use crate::error::BootError;
use crate::settings::{DiagnosticsConfig, ListenerConfig};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Request counters shared between the router binder and the stats listener.
#[derive(Debug)]
pub struct RuntimeStats {
    started: Instant,
    requests: AtomicU64,
    failures: AtomicU64,
    in_flight: AtomicU64,
}

impl Default for RuntimeStats {
    fn default() -> Self {
        RuntimeStats {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub failures: u64,
    pub in_flight: u64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn end(&self, failed: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

#[derive(Serialize)]
struct ProcessBody {
    service: String,
    pid: u32,
    version: &'static str,
    uptime_secs: u64,
    workers: usize,
    temp_dir: String,
}

#[derive(Clone)]
struct AgentState {
    service: String,
    temp_dir: PathBuf,
    stats: Arc<RuntimeStats>,
}

async fn process(State(state): State<AgentState>) -> Json<ProcessBody> {
    Json(ProcessBody {
        service: state.service.clone(),
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.stats.snapshot().uptime_secs,
        workers: tokio::runtime::Handle::current().metrics().num_workers(),
        temp_dir: state.temp_dir.display().to_string(),
    })
}

async fn stats(State(state): State<AgentState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub struct Diagnostics {
    config: DiagnosticsConfig,
    state: AgentState,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    bound: Mutex<Vec<(&'static str, SocketAddr)>>,
}

impl Diagnostics {
    pub fn new(
        service: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
        config: DiagnosticsConfig,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        Diagnostics {
            config,
            state: AgentState {
                service: service.into(),
                temp_dir: temp_dir.into(),
                stats,
            },
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            bound: Mutex::new(Vec::new()),
        }
    }

    /// Create the temp dir and bind the enabled listeners. Later calls are no-ops once one succeeds.
    ///
    /// If any listener fails to bind, the ones already running are torn down and `start` may be retried.
    pub async fn start(&self) -> Result<(), BootError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        if let Err(e) = self.launch().await {
            self.rollback();
            self.started.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    async fn launch(&self) -> Result<(), BootError> {
        tokio::fs::create_dir_all(&self.state.temp_dir).await?;
        let agents: [(&'static str, &ListenerConfig, Router<AgentState>); 2] = [
            (
                "process_inspect",
                &self.config.process_inspect,
                Router::new().route("/debug/process", get(process)),
            ),
            ("stats", &self.config.stats, Router::new().route("/debug/stats", get(stats))),
        ];
        for (name, cfg, router) in agents {
            if !cfg.enabled {
                continue;
            }
            let listener = TcpListener::bind((cfg.listen.as_str(), cfg.port))
                .await
                .inspect_err(|e| tracing::error!(agent = name, port = cfg.port, error = %e, "diagnostics bind failed"))?;
            let addr = listener.local_addr()?;
            tracing::info!(agent = name, addr = %addr, "diagnostics listener started");
            let app = router.with_state(self.state.clone());
            let shutdown = self.shutdown.clone();
            let task = tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                {
                    tracing::warn!(agent = name, error = %e, "diagnostics listener failed");
                }
            });
            self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(task);
            self.bound.lock().unwrap_or_else(PoisonError::into_inner).push((name, addr));
        }
        Ok(())
    }

    /// Abort listeners spawned by a failed `start`, leaving the shared shutdown token untouched.
    fn rollback(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        self.bound.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Addresses of running listeners, by agent name.
    pub fn bound(&self) -> Vec<(&'static str, SocketAddr)> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Shut the listeners down and wait for them.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "diagnostics task ended abnormally");
            }
        }
    }
}
