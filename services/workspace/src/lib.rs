//! Workspace service: stores named objects in a document store database and
//! exposes them over JSON-RPC 1.1.

pub mod client;
pub mod config;
pub mod rpc;
pub mod server;

pub use client::{WorkspaceClient, WorkspaceClientError};
pub use config::{WorkspaceSettings, SECTION};
pub use server::{initialize_workspace_db, WorkspaceServer, SERVER_VERSION};
