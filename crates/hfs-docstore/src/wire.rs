//! ---
//! hfs_section: "02-docstore"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "JSON bodies exchanged between the store server and its clients."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
}

/// Body of `GET /db`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseList {
    pub databases: Vec<String>,
}

/// Body of `GET /db/:db`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionList {
    pub collections: Vec<String>,
}

/// Body of `POST /db/:db/:collection`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inserted {
    pub id: String,
}

/// Body of `GET /db/:db/:collection`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Documents {
    pub documents: Vec<Value>,
}

/// Body of the `DELETE` routes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dropped {
    pub dropped: bool,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}
