//! ---
//! hfs_section: "02-docstore"
//! hfs_subsection: "binary"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Standalone document store process."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hfs_common::{init_tracing, stop_on_signal, LoggingConfig};
use hfs_docstore::{DocStoreServer, DocStoreSettings};
use tracing::info;

const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Parser, Debug)]
#[command(name = "hfs-docstore", about = "JSON document store with an HTTP API")]
struct Cli {
    /// Directory holding the store snapshot.
    #[arg(long, env = "HFS_DOCSTORE_DBPATH")]
    dbpath: PathBuf,

    /// Port to listen on; 0 picks a free one.
    #[arg(long, env = "HFS_DOCSTORE_PORT", default_value_t = 0)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "HFS_DOCSTORE_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// Directory where runtime logs should be written.
    #[arg(long, env = "HFS_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        file_name: "docstore.log".into(),
        ..LoggingConfig::in_directory(&cli.log_dir)
    };
    init_tracing("hfs-docstore", &logging)?;

    let settings = DocStoreSettings {
        dbpath: cli.dbpath,
        bind: SocketAddr::new(cli.bind, cli.port),
    };
    info!(dbpath = %settings.dbpath.display(), bind = %settings.bind, "starting document store");

    let server = Arc::new(DocStoreServer::new());
    let _signals = stop_on_signal(server.clone());
    server.run(&settings)
}
