//! ---
//! hfs_section: "02-docstore"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "Databases of JSON document collections with snapshot persistence."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Result, StoreError};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Field holding a document's identifier.
pub const ID_FIELD: &str = "_id";

type Collection = BTreeMap<String, Value>;
type Database = BTreeMap<String, Collection>;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u16,
    created_at: DateTime<Utc>,
    databases: BTreeMap<String, Database>,
}

/// Databases of named collections holding JSON objects keyed by `_id`.
///
/// Databases and collections spring into existence on first insert and vanish
/// once their last collection or document is dropped, so listing never shows
/// empty containers.
#[derive(Debug, Default)]
pub struct DocumentStore {
    databases: RwLock<BTreeMap<String, Database>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and return its identifier.
    ///
    /// A missing `_id` is filled with a generated UUID; a present one must be a
    /// non-empty string.
    pub fn insert(&self, database: &str, collection: &str, document: Value) -> Result<String> {
        let Value::Object(mut fields) = document else {
            return Err(StoreError::NotADocument);
        };
        let id = match fields.get(ID_FIELD) {
            None => {
                let id = Uuid::new_v4().to_string();
                fields.insert(ID_FIELD.to_owned(), Value::String(id.clone()));
                id
            }
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(other) => return Err(StoreError::InvalidId(other.to_string())),
        };

        self.databases
            .write()
            .entry(database.to_owned())
            .or_default()
            .entry(collection.to_owned())
            .or_default()
            .insert(id.clone(), Value::Object(fields));
        Ok(id)
    }

    pub fn get(&self, database: &str, collection: &str, id: &str) -> Option<Value> {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.get(collection))
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Documents whose top-level fields equal every field of `filter`.
    pub fn find(&self, database: &str, collection: &str, filter: &Map<String, Value>) -> Vec<Value> {
        let guard = self.databases.read();
        let Some(docs) = guard.get(database).and_then(|db| db.get(collection)) else {
            return Vec::new();
        };
        docs.values()
            .filter(|doc| matches_filter(doc, filter))
            .cloned()
            .collect()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.databases
            .read()
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a collection. Returns whether it existed.
    pub fn drop_collection(&self, database: &str, collection: &str) -> bool {
        let mut guard = self.databases.write();
        let Some(db) = guard.get_mut(database) else {
            return false;
        };
        let removed = db.remove(collection).is_some();
        if db.is_empty() {
            guard.remove(database);
        }
        removed
    }

    /// Drop a database with all its collections. Returns whether it existed.
    pub fn drop_database(&self, database: &str) -> bool {
        self.databases.write().remove(database).is_some()
    }

    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.databases
            .read()
            .get(database)
            .and_then(|db| db.get(collection))
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Persist every database to `path` as a JSON envelope.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            databases: self.databases.read().clone(),
        };

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &envelope)?;
        writer.flush()?;
        Ok(())
    }

    /// Replace the store contents with the snapshot at `path`.
    pub fn load_snapshot(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        let envelope: SnapshotEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedSnapshot(envelope.version));
        }
        *self.databases.write() = envelope.databases;
        Ok(())
    }
}

fn matches_filter(document: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}
