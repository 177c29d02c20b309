//! ---
//! hfs_section: "02-docstore"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Document store backing the workspace service."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
//! An in-memory JSON document store with snapshot persistence, served over a
//! small HTTP API, plus the client the workspace service and the harness use
//! to talk to it.

/// Result alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for document storage and snapshots.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing snapshots.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Raised when a stored value is not a JSON object.
    #[error("documents must be JSON objects")]
    NotADocument,
    /// Raised when `_id` is present but not a non-empty string.
    #[error("invalid document id: {0}")]
    InvalidId(String),
    /// Raised for snapshot envelopes written by an unknown version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedSnapshot(u16),
}

pub mod client;
pub mod server;
pub mod store;
pub mod wire;

pub use client::{ClientError, CollectionHandle, DatabaseHandle, DocStoreClient};
pub use server::{DocStoreServer, DocStoreSettings};
pub use store::{DocumentStore, ID_FIELD, SNAPSHOT_VERSION};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_readable() {
        let err = StoreError::InvalidId("7".into());
        assert_eq!(format!("{err}"), "invalid document id: 7");
    }
}
