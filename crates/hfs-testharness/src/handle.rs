//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Service handles running one managed service per thread, plus readiness polling."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hfs_common::ManagedService;
use parking_lot::Mutex;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, Result};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`ServiceHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// How the worker thread ended, once it has.
#[derive(Debug)]
enum WorkerOutcome {
    Pending(oneshot::Receiver<anyhow::Result<()>>),
    Finished(Option<String>),
}

/// Controller for one long-running service.
///
/// `start` runs the service's blocking start-up on a dedicated thread and
/// returns at once. Errors raised by the service are logged on that thread and
/// reported through a result channel; they never reach the caller of `start`.
/// A service that fails stays in [`LifecycleState::Starting`] with no port.
pub struct ServiceHandle {
    service: Arc<dyn ManagedService>,
    name: String,
    config_path: Option<PathBuf>,
    worker: Option<JoinHandle<()>>,
    outcome: Mutex<Option<WorkerOutcome>>,
    stopped: bool,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl ServiceHandle {
    pub fn new(service: Arc<dyn ManagedService>) -> Self {
        let name = service.name().to_owned();
        Self::named(name, service)
    }

    /// Handle reporting under `name` rather than the service's own name.
    pub fn named(name: impl Into<String>, service: Arc<dyn ManagedService>) -> Self {
        Self {
            service,
            name: name.into(),
            config_path: None,
            worker: None,
            outcome: Mutex::new(None),
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn start(&mut self, config_path: &Path) -> Result<()> {
        if self.worker.is_some() || self.stopped {
            return Err(HarnessError::AlreadyStarted {
                service: self.name.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let service = Arc::clone(&self.service);
        let name = self.name.clone();
        let path = config_path.to_path_buf();
        let worker = thread::Builder::new()
            .name(format!("svc-{}", self.name))
            .spawn(move || {
                let outcome = service.startup(&path);
                match &outcome {
                    Ok(()) => info!(service = %name, "service exited"),
                    Err(err) => error!(service = %name, error = %format!("{err:#}"), "service failed"),
                }
                let _ = tx.send(outcome);
            })
            .map_err(|source| HarnessError::Spawn {
                service: self.name.clone(),
                source,
            })?;

        info!(service = %self.name, config = %config_path.display(), "service thread started");
        self.config_path = Some(config_path.to_path_buf());
        self.worker = Some(worker);
        *self.outcome.lock() = Some(WorkerOutcome::Pending(rx));
        Ok(())
    }

    /// The bound port while the service is running.
    pub fn port(&self) -> Option<u16> {
        if self.worker.is_none() || self.stopped {
            return None;
        }
        self.service.server_port()
    }

    pub fn state(&self) -> LifecycleState {
        if self.stopped {
            LifecycleState::Stopped
        } else if self.worker.is_none() {
            LifecycleState::NotStarted
        } else if self.service.server_port().is_some() {
            LifecycleState::Running
        } else {
            LifecycleState::Starting
        }
    }

    /// Why the worker thread ended, if it ended without a clean stop.
    pub fn failure(&self) -> Option<String> {
        let mut guard = self.outcome.lock();
        if let Some(WorkerOutcome::Pending(rx)) = guard.as_mut() {
            let finished = match rx.try_recv() {
                Err(TryRecvError::Empty) => return None,
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(TryRecvError::Closed) => Some("service thread panicked".to_owned()),
            };
            *guard = Some(WorkerOutcome::Finished(finished));
        }
        match guard.as_ref() {
            Some(WorkerOutcome::Finished(failure)) => failure.clone(),
            _ => None,
        }
    }

    /// Request shutdown and wait up to `grace` for the thread to finish.
    ///
    /// Calling `stop` again, or on a handle that never started, does nothing.
    /// A thread still running after `grace` is detached and reported as
    /// [`HarnessError::StopTimeout`].
    pub fn stop(&mut self, grace: Duration) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let request_failure = match self.service.stop_server() {
            Ok(()) => None,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(service = %self.name, %reason, "stop request failed");
                Some(reason)
            }
        };

        let deadline = Instant::now() + grace;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(service = %self.name, ?grace, "service thread still running; detaching it");
                return Err(HarnessError::StopTimeout {
                    service: self.name.clone(),
                    timeout: grace,
                    cause: request_failure,
                });
            }
            thread::sleep(JOIN_POLL);
        }
        if worker.join().is_err() {
            warn!(service = %self.name, "service thread panicked");
        }
        if let Some(failure) = self.failure() {
            debug!(service = %self.name, %failure, "service had failed before stop");
        }
        info!(service = %self.name, "service stopped");
        match request_failure {
            None => Ok(()),
            Some(reason) => Err(HarnessError::Stop {
                service: self.name.clone(),
                reason,
            }),
        }
    }
}

/// Fixed-interval readiness poll with an explicit timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoller {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ReadinessPoller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Block until `handle` reports a port, or fail once the full timeout has
    /// elapsed.
    pub fn await_ready(&self, handle: &ServiceHandle) -> Result<u16> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            if let Some(port) = handle.port() {
                info!(service = %handle.name(), port, waited = ?started.elapsed(), "service ready");
                return Ok(port);
            }
            let now = Instant::now();
            if now >= deadline {
                let cause = handle.failure();
                warn!(service = %handle.name(), timeout = ?self.timeout, ?cause, "service never became ready");
                return Err(HarnessError::StartupTimeout {
                    service: handle.name().to_owned(),
                    timeout: self.timeout,
                    cause,
                });
            }
            thread::sleep(self.interval.min(deadline - now));
        }
    }
}

/// [`ReadinessPoller::await_ready`] with an ad-hoc interval and timeout.
pub fn await_ready(handle: &ServiceHandle, interval: Duration, timeout: Duration) -> Result<u16> {
    ReadinessPoller::new(interval, timeout).await_ready(handle)
}
