//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Harness lifecycle: set-up, per-test reset and ordered teardown of the chain."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hfs_common::{init_tracing, LoggingConfig, TokenValidator, UnverifiedTokenValidator};
use indexmap::IndexMap;
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::chain::{DependencyChain, Endpoint, SetupContext};
use crate::config_writer::ConfigWriter;
use crate::error::{HarnessError, ResetError, Result, TeardownError};
use crate::handle::{LifecycleState, ReadinessPoller, ServiceHandle};
use crate::prerequisites::Prerequisites;
use crate::reset::DatastoreReset;

/// Tunables for one harness instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOptions {
    pub readiness: ReadinessPoller,
    /// How long `tear_down` waits for each service thread.
    pub stop_grace: Duration,
    /// Leave config files and store data on disk after teardown.
    pub keep_temp_files: bool,
    pub workspace_database: String,
    pub type_database: String,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            readiness: ReadinessPoller::default(),
            stop_grace: Duration::from_secs(10),
            keep_temp_files: false,
            workspace_database: "ws_test".to_owned(),
            type_database: "type_test".to_owned(),
        }
    }
}

/// Brings a [`DependencyChain`] up in order and takes it down in reverse.
///
/// Dropping a harness that still has services running tears it down and logs
/// whatever failed.
pub struct Harness {
    chain: DependencyChain,
    options: HarnessOptions,
    validator: Arc<dyn TokenValidator>,
    prerequisites: Option<Prerequisites>,
    reset: Option<DatastoreReset>,
    writer: Option<ConfigWriter>,
    running: Vec<ServiceHandle>,
    endpoints: IndexMap<String, Endpoint>,
    scratch_dirs: Vec<TempDir>,
    stop_order: Vec<String>,
    log_file: Option<PathBuf>,
}

impl Harness {
    pub fn new(chain: DependencyChain, options: HarnessOptions) -> Self {
        Self {
            chain,
            options,
            validator: Arc::new(UnverifiedTokenValidator::from_env()),
            prerequisites: None,
            reset: None,
            writer: None,
            running: Vec::new(),
            endpoints: IndexMap::new(),
            scratch_dirs: Vec::new(),
            stop_order: Vec::new(),
            log_file: None,
        }
    }

    /// Use these prerequisites instead of reading the environment.
    pub fn with_prerequisites(mut self, prerequisites: Prerequisites) -> Self {
        self.prerequisites = Some(prerequisites);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Reset run by [`Harness::before_each_test`].
    pub fn with_reset(mut self, reset: DatastoreReset) -> Self {
        self.reset = Some(reset);
        self
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    pub fn chain(&self) -> &DependencyChain {
        &self.chain
    }

    pub fn prerequisites(&self) -> Option<&Prerequisites> {
        self.prerequisites.as_ref()
    }

    pub fn endpoint(&self, service: &str) -> Option<&Endpoint> {
        self.endpoints.get(service)
    }

    pub fn port(&self, service: &str) -> Option<u16> {
        self.endpoint(service).map(Endpoint::port)
    }

    /// Endpoints of every service that became ready, in start order.
    pub fn endpoints(&self) -> &IndexMap<String, Endpoint> {
        &self.endpoints
    }

    pub fn handle(&self, service: &str) -> Option<&ServiceHandle> {
        self.running.iter().find(|handle| handle.name() == service)
    }

    pub fn state(&self, service: &str) -> Option<LifecycleState> {
        self.handle(service).map(ServiceHandle::state)
    }

    /// Names of the services stopped by the most recent teardown, in the
    /// order they were stopped.
    pub fn stop_order(&self) -> &[String] {
        &self.stop_order
    }

    /// The harness log file, once set-up has initialised logging.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Start every service in chain order, waiting for each to become ready.
    ///
    /// On failure everything started so far is torn down and the original
    /// error is returned together with any teardown failures.
    pub fn set_up(&mut self) -> Result<()> {
        if let Some(running) = self.running.first() {
            return Err(HarnessError::AlreadyStarted {
                service: running.name().to_owned(),
            });
        }
        self.stop_order.clear();

        match self.start_chain() {
            Ok(()) => {
                info!(services = ?self.endpoints.keys().collect::<Vec<_>>(), "service chain ready");
                Ok(())
            }
            Err(cause) => {
                error!(error = %cause, "set-up failed; tearing down what was started");
                let teardown = self.tear_down().err();
                Err(HarnessError::SetupFailed {
                    cause: Box::new(cause),
                    teardown,
                })
            }
        }
    }

    fn start_chain(&mut self) -> Result<()> {
        let prerequisites = match self.prerequisites.clone() {
            Some(prerequisites) => prerequisites,
            None => Prerequisites::from_env(self.validator.as_ref())?,
        };
        self.prerequisites = Some(prerequisites.clone());
        let scratch = prerequisites.scratch().to_path_buf();
        std::fs::create_dir_all(&scratch).map_err(|source| HarnessError::ConfigWrite {
            path: scratch.clone(),
            source,
        })?;
        self.log_file = Some(init_tracing("hfs-testharness", &LoggingConfig::in_directory(&scratch))?);

        let writer = &*self
            .writer
            .insert(ConfigWriter::new(&scratch).keep_files(self.options.keep_temp_files));

        for definition in &self.chain.definitions {
            let mut ctx = SetupContext {
                service: &definition.name,
                depends_on: &definition.depends_on,
                endpoints: &self.endpoints,
                scratch: &scratch,
                scratch_dirs: &mut self.scratch_dirs,
                prerequisites: &prerequisites,
                options: &self.options,
            };
            let config = (definition.build_config)(&mut ctx)?;
            let service = (definition.factory)(&ctx);
            let path = writer.write(&config.section, &config.settings)?;

            let mut handle = ServiceHandle::named(definition.name.clone(), service);
            handle.start(&path)?;
            let ready = self.options.readiness.await_ready(&handle);
            self.running.push(handle);
            let port = ready?;
            self.endpoints
                .insert(definition.name.clone(), Endpoint::localhost(port));
        }
        Ok(())
    }

    /// Stop every started service in reverse start order, then release the
    /// scratch directories and config files.
    ///
    /// Each step runs regardless of earlier failures; all failures are
    /// returned together. Calling it again after a teardown does nothing.
    pub fn tear_down(&mut self) -> std::result::Result<(), TeardownError> {
        let mut failures = TeardownError::default();

        while let Some(mut handle) = self.running.pop() {
            let name = handle.name().to_owned();
            if let Err(err) = handle.stop(self.options.stop_grace) {
                warn!(service = %name, error = %err, "stop failed");
                failures.push(format!("stop {name}"), err);
            }
            self.stop_order.push(name);
        }
        self.endpoints.clear();

        for dir in self.scratch_dirs.drain(..) {
            if self.options.keep_temp_files {
                let kept = dir.into_path();
                info!(path = %kept.display(), "keeping scratch directory");
                continue;
            }
            let path = dir.path().to_path_buf();
            if let Err(source) = dir.close() {
                warn!(path = %path.display(), error = %source, "failed to remove scratch directory");
                failures.push(
                    format!("remove {}", path.display()),
                    HarnessError::Cleanup { path, source },
                );
            }
        }

        if let Some(writer) = self.writer.take() {
            for (path, source) in writer.release() {
                failures.push(
                    format!("remove {}", path.display()),
                    HarnessError::Cleanup { path, source },
                );
            }
        }

        if failures.is_empty() {
            info!(stopped = ?self.stop_order, "teardown complete");
        }
        failures.into_result()
    }

    /// Wipe the test database of the running store. No service is restarted.
    pub fn before_each_test(&self) -> Result<usize> {
        let Some(reset) = &self.reset else {
            return Ok(0);
        };
        let endpoint = self
            .endpoints
            .get(reset.service())
            .ok_or_else(|| ResetError::NotRunning(reset.service().to_owned()))?;
        Ok(reset.reset(endpoint)?)
    }

    /// Set up, run `body`, tear down.
    ///
    /// A failing body is reported first, with any teardown failures attached.
    pub fn run<T, F>(&mut self, body: F) -> Result<T>
    where
        F: FnOnce(&Harness) -> anyhow::Result<T>,
    {
        self.set_up()?;
        let outcome = body(self);
        let teardown = self.tear_down();
        match (outcome, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(teardown)) => Err(HarnessError::Teardown(teardown)),
            (Err(cause), teardown) => Err(HarnessError::RunFailed {
                cause,
                teardown: teardown.err(),
            }),
        }
    }

    fn needs_teardown(&self) -> bool {
        !self.running.is_empty() || !self.scratch_dirs.is_empty() || self.writer.is_some()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if !self.needs_teardown() {
            return;
        }
        warn!("harness dropped without teardown; tearing down now");
        if let Err(err) = self.tear_down() {
            error!(error = %err, "teardown on drop failed");
        }
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("chain", &self.chain)
            .field("options", &self.options)
            .field("endpoints", &self.endpoints)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}
