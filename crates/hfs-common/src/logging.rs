//! ---
//! hfs_section: "01-shared"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Process-wide tracing initialisation with a single log sink."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "HFS_LOG";

/// The one log sink of the process. Assigned at most once; every later
/// `init_tracing` call observes the first assignment.
static INSTALLED: OnceCell<InstalledSink> = OnceCell::new();

struct InstalledSink {
    log_file: PathBuf,
    _file_guard: WorkerGuard,
    _stdout_guard: WorkerGuard,
}

/// Available stdout log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Install the process-wide tracing subscriber and return the active log file.
///
/// * `HFS_LOG` overrides the filter (e.g. `info`, `debug,hyper=warn`). When unset
///   the standard `RUST_LOG` variable is honoured, finally defaulting to `info`.
/// * Only the first call installs anything. Later calls, including ones naming a
///   different directory, return the file chosen by the first call.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<PathBuf> {
    let sink = INSTALLED.get_or_try_init(|| install(service_name, config))?;
    Ok(sink.log_file.clone())
}

fn install(service_name: &str, config: &LoggingConfig) -> Result<InstalledSink> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::never(&config.directory, &config.file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to info logging");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    // A subscriber installed by someone else (a test runner, a host binary) wins.
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    let log_file = config.log_file();
    info!(service = %service_name, log_file = %log_file.display(), format = ?config.format, "tracing initialised");
    Ok(InstalledSink {
        log_file,
        _file_guard: file_guard,
        _stdout_guard: stdout_guard,
    })
}
