//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Blocking document store session and the external store process."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use hfs_common::{loopback, IniDocument, ManagedService};
use hfs_docstore::server::SECTION as STORE_SECTION;
use hfs_docstore::{ClientError, DocStoreClient, DocStoreSettings};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::error::ResetError;

/// Synchronous view of a document store, for the blocking harness.
///
/// Owns a private current-thread runtime, so it must not be used from inside
/// an async context.
#[derive(Debug)]
pub struct StoreSession {
    runtime: Runtime,
    client: DocStoreClient,
}

impl StoreSession {
    pub fn connect(address: &str) -> Result<Self, ResetError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ResetError::Runtime)?;
        let client = runtime
            .block_on(DocStoreClient::connect(address))
            .map_err(|source| ResetError::Connect {
                address: address.to_owned(),
                source,
            })?;
        Ok(Self { runtime, client })
    }

    pub fn address(&self) -> String {
        self.client.address()
    }

    pub fn database_names(&self) -> Result<Vec<String>, ClientError> {
        self.runtime.block_on(self.client.database_names())
    }

    pub fn collection_names(&self, database: &str) -> Result<Vec<String>, ClientError> {
        self.runtime
            .block_on(self.client.database(database).collection_names())
    }

    pub fn drop_collection(&self, database: &str, collection: &str) -> Result<bool, ClientError> {
        self.runtime
            .block_on(self.client.database(database).drop_collection(collection))
    }

    pub fn insert(&self, database: &str, collection: &str, document: &Value) -> Result<String, ClientError> {
        self.runtime.block_on(
            self.client
                .database(database)
                .collection(collection)
                .insert(document),
        )
    }

    pub fn find(&self, database: &str, collection: &str) -> Result<Vec<Value>, ClientError> {
        self.runtime.block_on(
            self.client
                .database(database)
                .collection(collection)
                .find(&[]),
        )
    }

    /// Write the settings document the workspace server checks at start-up.
    pub fn initialize_workspace_db(&self, database: &str, type_database: &str) -> Result<(), ClientError> {
        self.runtime.block_on(hfs_workspace::initialize_workspace_db(
            &self.client.database(database),
            type_database,
        ))
    }
}

/// A free loopback port, released again before returning.
pub fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(loopback(0))?;
    Ok(listener.local_addr()?.port())
}

const PROBE_INTERVAL: Duration = Duration::from_millis(50);
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Document store running as a child process of the harness.
///
/// `startup` reads the `[DocStore]` section, launches the binary on a freshly
/// chosen port and supervises it until `stop_server` is called. The port is
/// published once a TCP connection succeeds.
///
/// On stop the child gets SIGTERM so it can write its snapshot, and is killed
/// only if it is still running after the termination grace period.
#[derive(Debug)]
pub struct ProcessStore {
    binary: PathBuf,
    port: Mutex<Option<u16>>,
    stop: AtomicBool,
    term_grace: Duration,
}

impl ProcessStore {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            port: Mutex::new(None),
            stop: AtomicBool::new(false),
            term_grace: TERM_GRACE,
        }
    }

    /// How long the child may take to exit after SIGTERM before it is killed.
    pub fn with_term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn spawn(&self, settings: &DocStoreSettings, port: u16) -> anyhow::Result<Child> {
        std::fs::create_dir_all(&settings.dbpath)
            .with_context(|| format!("unable to create dbpath {}", settings.dbpath.display()))?;
        Command::new(&self.binary)
            .arg("--dbpath")
            .arg(&settings.dbpath)
            .arg("--port")
            .arg(port.to_string())
            .arg("--log-dir")
            .arg(settings.dbpath.join("logs"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to launch {}", self.binary.display()))
    }

    fn supervise(&self, child: &mut Child, address: SocketAddr) -> anyhow::Result<()> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(status) = child.try_wait().context("failed to poll store process")? {
                bail!("store process exited early with {status}");
            }
            if self.port.lock().is_none() && TcpStream::connect_timeout(&address, PROBE_TIMEOUT).is_ok() {
                info!(pid = child.id(), port = address.port(), "store process accepting connections");
                *self.port.lock() = Some(address.port());
            }
            thread::sleep(PROBE_INTERVAL);
        }
    }

    fn shut_down(&self, child: &mut Child) {
        let pid = child.id();
        if request_exit(child) {
            let deadline = Instant::now() + self.term_grace;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(pid, %status, "store process exited");
                        return;
                    }
                    Ok(None) if Instant::now() < deadline => thread::sleep(PROBE_INTERVAL),
                    Ok(None) => {
                        warn!(pid, grace = ?self.term_grace, "store process still running after SIGTERM; killing it");
                        break;
                    }
                    Err(err) => {
                        warn!(pid, error = %err, "failed to poll store process");
                        break;
                    }
                }
            }
        }
        if let Err(err) = child.kill() {
            if err.kind() != std::io::ErrorKind::InvalidInput {
                warn!(pid, error = %err, "failed to kill store process");
            }
        }
        let _ = child.wait();
    }
}

/// Ask the child to exit. Returns whether the request was delivered.
#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: kill(2) takes no pointers; pid is our own unreaped child.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        return true;
    }
    warn!(pid, error = %std::io::Error::last_os_error(), "failed to send SIGTERM to store process");
    false
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

impl ManagedService for ProcessStore {
    fn name(&self) -> &str {
        "docstore-process"
    }

    fn startup(&self, config_path: &Path) -> anyhow::Result<()> {
        let section = IniDocument::load_section(config_path, STORE_SECTION)?;
        let settings = DocStoreSettings::from_section(&section)?;
        let port = match settings.bind.port() {
            0 => free_port().context("unable to pick a port for the store")?,
            port => port,
        };

        let mut child = self.spawn(&settings, port)?;
        debug!(pid = child.id(), binary = %self.binary.display(), port, "store process launched");
        let outcome = self.supervise(&mut child, loopback(port));

        *self.port.lock() = None;
        self.shut_down(&mut child);
        outcome
    }

    fn server_port(&self) -> Option<u16> {
        *self.port.lock()
    }

    fn stop_server(&self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn free_port_is_nonzero() {
        assert!(free_port().unwrap() > 0);
    }

    #[test]
    fn missing_binary_fails_startup_without_a_port() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("store.cfg");
        std::fs::write(
            &config,
            format!("[DocStore]\ndbpath={}\n", dir.path().join("db").display()),
        )
        .unwrap();

        let store = ProcessStore::new(dir.path().join("no-such-binary"));
        let err = store.startup(&config).unwrap_err();
        assert!(format!("{err:#}").contains("failed to launch"));
        assert_eq!(store.server_port(), None);
    }

    #[test]
    fn session_reports_unreachable_store() {
        let port = free_port().unwrap();
        let err = StoreSession::connect(&format!("127.0.0.1:{port}")).unwrap_err();
        assert!(matches!(err, ResetError::Connect { .. }));
    }

    #[cfg(unix)]
    fn fake_store(dir: &Path, body: &str) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let binary = dir.join("fake-store.sh");
        std::fs::write(&binary, format!("#!/bin/sh\n{body}\nwhile true; do sleep 0.05; done\n")).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = dir.join("store.cfg");
        std::fs::write(
            &config,
            format!("[DocStore]\ndbpath={}\n", dir.join("db").display()),
        )
        .unwrap();
        (binary, config)
    }

    #[cfg(unix)]
    fn run_then_stop(store: ProcessStore, config: PathBuf) -> (anyhow::Result<()>, Duration) {
        let store = std::sync::Arc::new(store);
        let worker = {
            let store = std::sync::Arc::clone(&store);
            thread::spawn(move || store.startup(&config))
        };
        thread::sleep(Duration::from_millis(500));
        store.stop_server().unwrap();
        let stopping = Instant::now();
        let outcome = worker.join().unwrap();
        (outcome, stopping.elapsed())
    }

    #[cfg(unix)]
    #[test]
    fn stop_lets_the_store_exit_on_sigterm() {
        let dir = tempdir().unwrap();
        // $2 is the --dbpath argument.
        let (binary, config) = fake_store(dir.path(), r#"trap 'touch "$2/terminated"; exit 0' TERM"#);

        let (outcome, _) = run_then_stop(ProcessStore::new(binary), config);
        outcome.unwrap();
        assert!(dir.path().join("db").join("terminated").exists());
    }

    #[cfg(unix)]
    #[test]
    fn store_ignoring_sigterm_is_killed_after_the_grace_period() {
        let dir = tempdir().unwrap();
        let (binary, config) = fake_store(dir.path(), "trap '' TERM");

        let store = ProcessStore::new(binary).with_term_grace(Duration::from_millis(200));
        let (outcome, took) = run_then_stop(store, config);
        outcome.unwrap();
        assert!(took >= Duration::from_millis(200), "{took:?}");
        assert!(took < TERM_GRACE, "{took:?}");
    }
}
