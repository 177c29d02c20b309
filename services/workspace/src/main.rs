use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hfs_common::{init_tracing, stop_on_signal, LoggingConfig};
use hfs_workspace::{WorkspaceServer, WorkspaceSettings};
use tracing::info;

const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Parser, Debug)]
#[command(name = "hfs-workspace", about = "Workspace JSON-RPC service")]
struct Cli {
    /// Sectioned configuration file holding a [Workspace] section.
    #[arg(long, env = "KB_DEPLOYMENT_CONFIG")]
    config: PathBuf,

    /// Directory where runtime logs should be written.
    #[arg(long, env = "HFS_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        file_name: "workspace.log".into(),
        ..LoggingConfig::in_directory(&cli.log_dir)
    };
    init_tracing("hfs-workspace", &logging)?;

    let settings = WorkspaceSettings::load(&cli.config)?;
    info!(path = %cli.config.display(), store = %settings.store_host, "starting workspace server");

    let server = Arc::new(WorkspaceServer::new());
    let _signals = stop_on_signal(server.clone());
    server.run(&settings)
}
