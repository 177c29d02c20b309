//! ---
//! hfs_section: "01-shared"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Shared primitives for the harness and the services it drives."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
//! Core shared primitives for the HTML FileSet harness workspace.
//! This crate exposes sectioned configuration files, the deployment
//! descriptor, logging initialisation, auth token resolution and the
//! contract every managed service implements.

pub mod auth;
pub mod config;
pub mod logging;
pub mod service;

pub use auth::{AuthError, AuthToken, TokenValidator, UnverifiedTokenValidator};
pub use config::{
    ConfigError, DeploymentDescriptor, IniDocument, LoggingConfig, Section, SectionSettings,
};
pub use logging::{init_tracing, LogFormat};
pub use service::{loopback, stop_on_signal, ManagedService, ServerControl};
