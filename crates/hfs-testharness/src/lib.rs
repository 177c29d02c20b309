//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "crate"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Service chain test harness: config files, service handles, set-up and teardown."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
//! Brings up a chain of dependent services for integration tests.
//!
//! A [`Harness`] walks a [`DependencyChain`] in order: it writes each
//! service's configuration with a [`ConfigWriter`], starts the service on its
//! own thread through a [`ServiceHandle`] and blocks until the
//! [`ReadinessPoller`] sees a bound port. Teardown runs in exact reverse
//! order. [`DatastoreReset`] empties the test database between tests.
//!
//! [`standard_harness`] wires up the document store, workspace and HTML
//! FileSet servers.

pub mod chain;
pub mod config_writer;
pub mod error;
pub mod handle;
pub mod harness;
pub mod prerequisites;
pub mod reset;
pub mod stack;
pub mod store;

pub use chain::{DependencyChain, Endpoint, ServiceConfig, ServiceDefinition, SetupContext};
pub use config_writer::ConfigWriter;
pub use error::{HarnessError, ResetError, Result, TeardownError, TeardownFailure};
pub use handle::{await_ready, LifecycleState, ReadinessPoller, ServiceHandle};
pub use harness::{Harness, HarnessOptions};
pub use prerequisites::Prerequisites;
pub use reset::DatastoreReset;
pub use stack::{standard_chain, standard_harness, HTML, STORE, WORKSPACE};
pub use store::{free_port, ProcessStore, StoreSession};
