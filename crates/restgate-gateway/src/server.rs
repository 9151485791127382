//! Axum-based HTTP listener with attachable handler trees.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use restgate_core::error::{GatewayError, Result};

use crate::lifecycle::Lifecycle;

/// A listener shared between several components. Its owner starts and stops it.
pub type SharedListener = Arc<Mutex<HttpListener>>;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long connections get to flush their cancellation responses before
/// the server task is aborted.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Nothing attached yet.
    Unbuilt,
    /// At least one handler tree attached, not serving.
    Attached,
    Running,
    /// Terminal.
    Stopped,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unbuilt => "unbuilt",
            Self::Attached => "attached",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct Mount {
    prefix: String,
    router: Router,
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    /// Cancels every request still being handled.
    cancel: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// HTTP server that owns its socket.
///
/// Handler trees are attached under path prefixes before [`start`](Self::start);
/// they are served side by side from one port.
pub struct HttpListener {
    addr: SocketAddr,
    shutdown_timeout: Duration,
    mounts: Vec<Mount>,
    state: ListenerState,
    server: Option<RunningServer>,
}

impl HttpListener {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            mounts: Vec::new(),
            state: ListenerState::Unbuilt,
            server: None,
        }
    }

    /// Bound on how long [`stop`](Self::stop) waits for in-flight requests.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Wrap into a [`SharedListener`].
    pub fn into_shared(self) -> SharedListener {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Configured bind address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address actually bound while running (differs from `addr` for port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.state == ListenerState::Running
            && self.server.as_ref().is_some_and(|s| !s.task.is_finished())
    }

    pub fn mounted_prefixes(&self) -> Vec<&str> {
        self.mounts.iter().map(|m| m.prefix.as_str()).collect()
    }

    /// Attach one handler tree under `prefix`.
    pub fn attach(&mut self, prefix: &str, router: Router) -> Result<()> {
        self.attach_all(vec![(prefix.to_string(), router)])
    }

    /// Attach several handler trees at once.
    ///
    /// Either all trees are attached or none: every prefix is checked
    /// against the existing mounts and against each other first.
    pub fn attach_all(&mut self, trees: Vec<(String, Router)>) -> Result<()> {
        if matches!(self.state, ListenerState::Running | ListenerState::Stopped) {
            return Err(GatewayError::Configuration(format!(
                "Cannot attach handlers: listener on {} is {}",
                self.addr, self.state
            )));
        }

        let mut staged: Vec<Mount> = Vec::with_capacity(trees.len());
        for (prefix, router) in trees {
            let prefix = normalize_prefix(&prefix)?;
            let claimed = self
                .mounts
                .iter()
                .chain(staged.iter())
                .find(|m| prefixes_overlap(&m.prefix, &prefix));
            if let Some(existing) = claimed {
                return Err(GatewayError::Conflict(format!(
                    "Handler prefix '{prefix}' overlaps '{}' on {}",
                    existing.prefix, self.addr
                )));
            }
            staged.push(Mount { prefix, router });
        }

        for mount in &staged {
            debug!(prefix = %mount.prefix, addr = %self.addr, "Handler tree attached");
        }
        self.mounts.extend(staged);
        if !self.mounts.is_empty() {
            self.state = ListenerState::Attached;
        }
        Ok(())
    }

    /// Bind the socket and start serving.
    ///
    /// No-op when already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!(addr = %self.addr, "Listener already running");
            return Ok(());
        }

        match self.state {
            ListenerState::Stopped => {
                return Err(GatewayError::ServerStart(format!(
                    "Listener on {} has been stopped",
                    self.addr
                )));
            }
            ListenerState::Unbuilt => {
                return Err(GatewayError::ServerStart(format!(
                    "No handler trees attached to listener on {}",
                    self.addr
                )));
            }
            ListenerState::Running => {
                // The server task exited on its own; reap it and serve again.
                if let Some(dead) = self.server.take() {
                    match dead.task.await {
                        Ok(Err(e)) => warn!(error = %e, "Previous server task failed"),
                        Err(e) => warn!(error = %e, "Previous server task panicked"),
                        Ok(Ok(())) => {}
                    }
                }
                self.state = ListenerState::Attached;
            }
            ListenerState::Attached => {}
        }

        let cancel = CancellationToken::new();
        let app = self.build_router(cancel.clone());
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::ServerStart(format!("Failed to bind {}: {e}", self.addr)))?;
        let local_addr = listener.local_addr().map_err(|e| {
            GatewayError::ServerStart(format!("Failed to query bound address: {e}"))
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    // A dropped sender also means shut down.
                    let _ = shutdown_rx.await;
                })
                .await
        });

        self.server = Some(RunningServer {
            local_addr,
            shutdown_tx,
            cancel,
            task,
        });
        self.state = ListenerState::Running;
        info!(addr = %local_addr, prefixes = ?self.mounted_prefixes(), "HTTP listener started");
        Ok(())
    }

    /// Stop serving and release the socket.
    ///
    /// Idempotent and valid from any state; always ends in `Stopped`.
    /// Waits up to the shutdown timeout for in-flight requests, then
    /// cancels the ones still running (their clients get a 503) and aborts
    /// the server. The first failure is returned, later ones are only
    /// logged.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == ListenerState::Stopped {
            return Ok(());
        }
        self.state = ListenerState::Stopped;

        let Some(server) = self.server.take() else {
            debug!(addr = %self.addr, "Listener stopped before it was started");
            return Ok(());
        };

        let mut first_error: Option<GatewayError> = None;
        let mut record = |e: GatewayError| {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                warn!(error = %e, "Additional listener teardown failure");
            }
        };

        // The server may already be gone, in which case the send fails harmlessly.
        let _ = server.shutdown_tx.send(());
        let mut task = server.task;
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => record(GatewayError::Io(e)),
            Ok(Err(e)) => record(GatewayError::Other(anyhow::anyhow!(
                "Server task panicked: {e}"
            ))),
            Err(_) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Graceful shutdown timed out, cancelling in-flight requests"
                );
                server.cancel.cancel();
                let joined = match tokio::time::timeout(CANCEL_GRACE, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        task.abort();
                        task.await
                    }
                };
                match joined {
                    Err(e) if !e.is_cancelled() => record(GatewayError::Other(
                        anyhow::anyhow!("Server task panicked: {e}"),
                    )),
                    Ok(Err(e)) => record(GatewayError::Io(e)),
                    _ => {}
                }
                record(GatewayError::Shutdown(format!(
                    "Listener on {} did not drain within {:?}; in-flight requests were cancelled",
                    server.local_addr, self.shutdown_timeout
                )));
            }
        }

        match first_error {
            Some(e) => {
                error!(addr = %server.local_addr, error = %e, "HTTP listener stopped with errors");
                Err(e)
            }
            None => {
                info!(addr = %server.local_addr, "HTTP listener stopped");
                Ok(())
            }
        }
    }

    fn build_router(&self, cancel: CancellationToken) -> Router {
        let mut app = Router::new();
        for mount in &self.mounts {
            app = if mount.prefix == "/" {
                app.merge(mount.router.clone())
            } else {
                app.nest(&mount.prefix, mount.router.clone())
            };
        }
        app.layer(middleware::from_fn_with_state(cancel, cancel_on_shutdown))
            .layer(TraceLayer::new_for_http())
    }
}

/// Race each request against the listener's cancellation token.
async fn cancel_on_shutdown(
    State(cancel): State<CancellationToken>,
    req: Request,
    next: Next,
) -> Response {
    tokio::select! {
        resp = next.run(req) => resp,
        _ = cancel.cancelled() => {
            (StatusCode::SERVICE_UNAVAILABLE, "Listener is shutting down").into_response()
        }
    }
}

impl Drop for HttpListener {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            let _ = server.shutdown_tx.send(());
            server.cancel.cancel();
            server.task.abort();
        }
    }
}

#[async_trait]
impl Lifecycle for HttpListener {
    fn name(&self) -> &str {
        "http-listener"
    }

    async fn initialize(&mut self) -> Result<()> {
        self.start().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stop().await
    }
}

fn normalize_prefix(prefix: &str) -> Result<String> {
    let trimmed = prefix.trim();
    if !trimmed.starts_with('/') {
        return Err(GatewayError::Configuration(format!(
            "Handler prefix '{prefix}' must start with '/'"
        )));
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.is_empty() {
        return Ok("/".to_string());
    }
    if normalized.contains(['{', '}', '*']) {
        return Err(GatewayError::Configuration(format!(
            "Handler prefix '{prefix}' must not contain route parameters"
        )));
    }
    Ok(normalized.to_string())
}

/// Two prefixes overlap when one equals the other or is a whole-segment
/// prefix of it. The root `/` overlaps everything.
fn prefixes_overlap(a: &str, b: &str) -> bool {
    if a == "/" || b == "/" || a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
    long.starts_with(short) && long.as_bytes()[short.len()] == b'/'
}
