//! HTML FileSet server: serves the `html` field of workspace objects.

pub mod config;
pub mod server;

pub use config::{HtmlServSettings, SECTION};
pub use server::HtmlFileSetServer;
