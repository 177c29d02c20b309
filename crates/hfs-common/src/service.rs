//! ---
//! hfs_section: "01-shared"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Managed service contract and the shared HTTP serving loop."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Grace period for runtime tasks still alive once the server has stopped.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A long-running service the harness can start on a dedicated thread.
///
/// `startup` blocks the calling thread for the lifetime of the service and
/// returns once `stop_server` has been honoured (or start-up failed).
/// `server_port` stays `None` until the listening socket is bound.
pub trait ManagedService: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn startup(&self, config_path: &Path) -> Result<()>;

    fn server_port(&self) -> Option<u16>;

    /// Request graceful shutdown. Calling it more than once is harmless.
    fn stop_server(&self) -> Result<()>;
}

/// Loopback address on the requested port; `0` asks the OS for a free one.
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Serving loop shared by the axum based services.
///
/// Each call to [`ServerControl::run`] owns a private tokio runtime, so no
/// runtime state leaks between services running in the same process.
#[derive(Debug)]
pub struct ServerControl {
    name: String,
    port: Mutex<Option<u16>>,
    shutdown: watch::Sender<bool>,
}

impl ServerControl {
    pub fn new(name: impl Into<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.into(),
            port: Mutex::new(None),
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> Option<u16> {
        *self.port.lock()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Build the router with `build`, bind `bind` and serve until shutdown is
    /// requested. Blocks the calling thread.
    pub fn run<F, Fut>(&self, bind: SocketAddr, build: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Router>>,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("{}-rt", self.name))
            .enable_all()
            .build()
            .with_context(|| format!("failed to build runtime for {}", self.name))?;

        let result = runtime.block_on(self.serve(bind, build));
        *self.port.lock() = None;
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
        result
    }

    async fn serve<F, Fut>(&self, bind: SocketAddr, build: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Router>>,
    {
        let router = build().await?;

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            debug!(service = %self.name, "shutdown requested before bind; not serving");
            return Ok(());
        }

        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("{} failed to bind {bind}", self.name))?;
        let local_addr = listener.local_addr()?;
        *self.port.lock() = Some(local_addr.port());
        info!(service = %self.name, address = %local_addr, "service listening");

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .with_context(|| format!("{} server error", self.name))?;

        info!(service = %self.name, "service stopped");
        Ok(())
    }
}

/// Stop `service` when the process receives Ctrl+C or SIGTERM.
///
/// Used by the standalone binaries; the harness stops services explicitly.
pub fn stop_on_signal(service: Arc<dyn ManagedService>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(?err, "failed to build signal runtime; signals will not stop the service");
                return;
            }
        };
        runtime.block_on(shutdown_signal());
        info!(service = %service.name(), "shutdown signal received");
        if let Err(err) = service.stop_server() {
            warn!(service = %service.name(), error = %err, "stop request failed");
        }
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => warn!(?err, "failed to install SIGTERM handler"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Instant;

    use axum::routing::get;

    fn wait_for_port(control: &ServerControl) -> u16 {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(port) = control.port() {
                return port;
            }
            assert!(Instant::now() < deadline, "server never bound a port");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn serves_until_shutdown_requested() {
        let control = Arc::new(ServerControl::new("probe"));
        let worker = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                control.run(loopback(0), || async {
                    Ok(Router::new().route("/healthz", get(|| async { "ok" })))
                })
            })
        };

        let port = wait_for_port(&control);
        assert!(port > 0);
        TcpStream::connect(loopback(port)).expect("listener accepts connections");

        control.request_shutdown();
        worker.join().unwrap().unwrap();

        assert_eq!(control.port(), None);
        assert!(TcpStream::connect(loopback(port)).is_err());
    }

    #[test]
    fn shutdown_before_bind_skips_serving() {
        let control = ServerControl::new("early");
        control.request_shutdown();
        control
            .run(loopback(0), || async { Ok(Router::new()) })
            .unwrap();
        assert_eq!(control.port(), None);
    }

    #[test]
    fn router_build_failure_is_returned() {
        let control = ServerControl::new("broken");
        let err = control
            .run(loopback(0), || async { Err(anyhow::anyhow!("no backend")) })
            .unwrap_err();
        assert!(err.to_string().contains("no backend"));
        assert_eq!(control.port(), None);
    }
}
