//! ---
//! hfs_section: "04-testharness"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Per-test wipe of the store database without restarting services."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use tracing::{debug, info};

use crate::chain::Endpoint;
use crate::error::ResetError;
use crate::store::StoreSession;

/// Drops every collection of one database on a running store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreReset {
    service: String,
    database: String,
}

impl DatastoreReset {
    /// Reset `database` on the store started under the chain name `service`.
    pub fn new(service: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            database: database.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Connect to the store at `endpoint` and wipe the database. Returns the
    /// number of collections dropped; an already empty database is fine.
    pub fn reset(&self, endpoint: &Endpoint) -> Result<usize, ResetError> {
        let session = StoreSession::connect(&endpoint.host_port())?;
        self.wipe(&session)
    }

    pub fn wipe(&self, session: &StoreSession) -> Result<usize, ResetError> {
        let wipe_failed = |source| ResetError::Wipe {
            database: self.database.clone(),
            source,
        };

        let collections = session
            .collection_names(&self.database)
            .map_err(wipe_failed)?;
        let mut dropped = 0;
        for collection in &collections {
            if session
                .drop_collection(&self.database, collection)
                .map_err(wipe_failed)?
            {
                debug!(database = %self.database, %collection, "dropped collection");
                dropped += 1;
            }
        }
        info!(store = %session.address(), database = %self.database, dropped, "database reset");
        Ok(dropped)
    }
}
