//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Error types raised while setting up, resetting and tearing down the chain."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use hfs_common::{AuthError, ConfigError};
use hfs_docstore::ClientError;
use thiserror::Error;

/// Result alias used throughout the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to write configuration into {path:?}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration cannot be written as key=value lines")]
    ConfigRender(#[source] ConfigError),
    #[error("failed to remove {path:?}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("deployment descriptor unusable")]
    Descriptor(#[from] ConfigError),
    #[error("auth token unavailable")]
    Auth(#[from] AuthError),
    #[error("invalid dependency chain: {0}")]
    InvalidChain(String),
    #[error("service {service} asked for the endpoint of {dependency}, which is not an earlier dependency")]
    UnresolvedDependency { service: String, dependency: String },
    #[error("failed to spawn the worker thread for {service}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },
    #[error("service {service} was already started")]
    AlreadyStarted { service: String },
    #[error("service {service} did not report a port within {timeout:?}{}", cause_suffix(.cause))]
    StartupTimeout {
        service: String,
        timeout: Duration,
        cause: Option<String>,
    },
    #[error("service {service} did not stop within {timeout:?}{}", cause_suffix(.cause))]
    StopTimeout {
        service: String,
        timeout: Duration,
        cause: Option<String>,
    },
    #[error("service {service} failed to stop: {reason}")]
    Stop { service: String, reason: String },
    #[error(transparent)]
    Teardown(#[from] TeardownError),
    #[error(transparent)]
    Reset(#[from] ResetError),
    #[error("set-up failed: {cause}{}", teardown_suffix(.teardown))]
    SetupFailed {
        cause: Box<HarnessError>,
        teardown: Option<TeardownError>,
    },
    #[error("test body failed: {cause:#}{}", teardown_suffix(.teardown))]
    RunFailed {
        cause: anyhow::Error,
        teardown: Option<TeardownError>,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarnessError {
    /// The teardown aggregate attached to a failed set-up or test body.
    pub fn teardown(&self) -> Option<&TeardownError> {
        match self {
            HarnessError::Teardown(err) => Some(err),
            HarnessError::SetupFailed { teardown, .. } | HarnessError::RunFailed { teardown, .. } => {
                teardown.as_ref()
            }
            _ => None,
        }
    }
}

fn cause_suffix(cause: &Option<String>) -> String {
    cause
        .as_ref()
        .map(|cause| format!(" (last failure: {cause})"))
        .unwrap_or_default()
}

fn teardown_suffix(teardown: &Option<TeardownError>) -> String {
    teardown
        .as_ref()
        .map(|err| format!("; additionally {err}"))
        .unwrap_or_default()
}

/// One failed teardown step.
#[derive(Debug)]
pub struct TeardownFailure {
    pub step: String,
    pub error: HarnessError,
}

/// Every teardown step that failed, in the order they ran.
#[derive(Debug, Default)]
pub struct TeardownError {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownError {
    pub fn push(&mut self, step: impl Into<String>, error: HarnessError) {
        self.failures.push(TeardownFailure {
            step: step.into(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> std::result::Result<(), TeardownError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown failed in {} step(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("cannot reach the document store at {address}")]
    Connect {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("failed to wipe database {database}")]
    Wipe {
        database: String,
        #[source]
        source: ClientError,
    },
    #[error("store service {0} is not running")]
    NotRunning(String),
    #[error("failed to build the store session runtime")]
    Runtime(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failure_reports_cause_before_teardown() {
        let mut teardown = TeardownError::default();
        teardown.push(
            "stop Workspace",
            HarnessError::StopTimeout {
                service: "Workspace".into(),
                timeout: Duration::from_secs(1),
                cause: None,
            },
        );
        let err = HarnessError::SetupFailed {
            cause: Box::new(HarnessError::StartupTimeout {
                service: "HTMLFileSetServ".into(),
                timeout: Duration::from_millis(50),
                cause: None,
            }),
            teardown: Some(teardown),
        };
        let rendered = err.to_string();
        let cause_at = rendered.find("HTMLFileSetServ").unwrap();
        let teardown_at = rendered.find("stop Workspace").unwrap();
        assert!(cause_at < teardown_at, "{rendered}");
        assert_eq!(err.teardown().map(|t| t.failures.len()), Some(1));
    }

    #[test]
    fn empty_teardown_is_ok() {
        assert!(TeardownError::default().into_result().is_ok());
    }
}
