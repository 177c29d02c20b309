//! ---
//! hfs_section: "02-docstore"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "HTTP front end for the document store."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hfs_common::config::{ConfigError, IniDocument, Section};
use hfs_common::ManagedService;
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::store::DocumentStore;
use crate::wire::{CollectionList, DatabaseList, Documents, Dropped, ErrorBody, Health, Inserted};
use crate::StoreError;

/// Section of the service configuration file read by the store.
pub const SECTION: &str = "DocStore";

/// File inside `dbpath` holding the persisted databases.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// Where the store keeps its data and which address it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocStoreSettings {
    pub dbpath: PathBuf,
    pub bind: SocketAddr,
}

impl DocStoreSettings {
    /// Loopback on an OS-assigned port.
    pub fn new(dbpath: impl Into<PathBuf>) -> Self {
        Self {
            dbpath: dbpath.into(),
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        }
    }

    /// Read `dbpath` (required), `port` (default 0) and `bind-address`
    /// (default 127.0.0.1).
    pub fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let dbpath = section.require_path("dbpath")?;
        let port = match section.get("port").map(str::trim) {
            None | Some("") => 0,
            Some(raw) => raw.parse::<u16>().map_err(|err| ConfigError::InvalidValue {
                section: section.name().to_owned(),
                key: "port".into(),
                reason: err.to_string(),
            })?,
        };
        let host = match section.get("bind-address").map(str::trim) {
            None | Some("") => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(raw) => raw.parse::<IpAddr>().map_err(|err| ConfigError::InvalidValue {
                section: section.name().to_owned(),
                key: "bind-address".into(),
                reason: err.to_string(),
            })?,
        };
        Ok(Self {
            dbpath,
            bind: SocketAddr::new(host, port),
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dbpath.join(SNAPSHOT_FILE)
    }
}

/// The document store as a managed service.
#[derive(Debug)]
pub struct DocStoreServer {
    control: hfs_common::ServerControl,
    store: Arc<DocumentStore>,
}

impl Default for DocStoreServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DocStoreServer {
    pub fn new() -> Self {
        Self {
            control: hfs_common::ServerControl::new("docstore"),
            store: Arc::new(DocumentStore::new()),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Restore the snapshot, serve until stopped, then write the snapshot back.
    /// Blocks the calling thread.
    pub fn run(&self, settings: &DocStoreSettings) -> anyhow::Result<()> {
        std::fs::create_dir_all(&settings.dbpath).with_context(|| {
            format!("unable to create dbpath {}", settings.dbpath.display())
        })?;

        let snapshot = settings.snapshot_path();
        if snapshot.exists() {
            self.store
                .load_snapshot(&snapshot)
                .with_context(|| format!("unable to restore {}", snapshot.display()))?;
            info!(path = %snapshot.display(), databases = self.store.database_names().len(), "restored snapshot");
        }

        let store = Arc::clone(&self.store);
        self.control
            .run(settings.bind, || async move { Ok(router(store)) })?;

        self.store
            .save_snapshot(&snapshot)
            .with_context(|| format!("unable to write {}", snapshot.display()))?;
        info!(path = %snapshot.display(), "snapshot written");
        Ok(())
    }
}

impl ManagedService for DocStoreServer {
    fn name(&self) -> &str {
        self.control.name()
    }

    fn startup(&self, config_path: &Path) -> anyhow::Result<()> {
        let section = IniDocument::load_section(config_path, SECTION)?;
        let settings = DocStoreSettings::from_section(&section)?;
        self.run(&settings)
    }

    fn server_port(&self) -> Option<u16> {
        self.control.port()
    }

    fn stop_server(&self) -> anyhow::Result<()> {
        self.control.request_shutdown();
        Ok(())
    }
}

/// HTTP routes over `store`.
pub fn router(store: Arc<DocumentStore>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/db", get(list_databases))
        .route("/db/:db", get(list_collections).delete(drop_database))
        .route(
            "/db/:db/:collection",
            get(find_documents)
                .post(insert_document)
                .delete(drop_collection),
        )
        .route("/db/:db/:collection/:id", get(get_document))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Rejected(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Rejected(err) => {
                warn!(error = %err, "rejected document");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

type Shared = State<Arc<DocumentStore>>;

async fn healthz() -> Json<Health> {
    Json(Health {
        status: "ok".into(),
    })
}

async fn list_databases(State(store): Shared) -> Json<DatabaseList> {
    Json(DatabaseList {
        databases: store.database_names(),
    })
}

async fn list_collections(State(store): Shared, UrlPath(db): UrlPath<String>) -> Json<CollectionList> {
    Json(CollectionList {
        collections: store.collection_names(&db),
    })
}

async fn drop_database(State(store): Shared, UrlPath(db): UrlPath<String>) -> Json<Dropped> {
    let dropped = store.drop_database(&db);
    info!(database = %db, dropped, "drop database");
    Json(Dropped { dropped })
}

async fn find_documents(
    State(store): Shared,
    UrlPath((db, collection)): UrlPath<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Documents> {
    let filter: Map<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    Json(Documents {
        documents: store.find(&db, &collection, &filter),
    })
}

async fn insert_document(
    State(store): Shared,
    UrlPath((db, collection)): UrlPath<(String, String)>,
    Json(document): Json<Value>,
) -> Result<(StatusCode, Json<Inserted>), ApiError> {
    let id = store
        .insert(&db, &collection, document)
        .map_err(ApiError::Rejected)?;
    Ok((StatusCode::CREATED, Json(Inserted { id })))
}

async fn drop_collection(
    State(store): Shared,
    UrlPath((db, collection)): UrlPath<(String, String)>,
) -> Json<Dropped> {
    let dropped = store.drop_collection(&db, &collection);
    info!(database = %db, collection = %collection, dropped, "drop collection");
    Json(Dropped { dropped })
}

async fn get_document(
    State(store): Shared,
    UrlPath((db, collection, id)): UrlPath<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    store
        .get(&db, &collection, &id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("document {db}/{collection}/{id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hfs_common::SectionSettings;

    fn section(pairs: &[(&str, &str)]) -> Section {
        let settings: SectionSettings = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Section::new(SECTION, settings)
    }

    #[test]
    fn settings_default_to_ephemeral_loopback() {
        let settings = DocStoreSettings::from_section(&section(&[("dbpath", "/tmp/db")])).unwrap();
        assert_eq!(settings.dbpath, PathBuf::from("/tmp/db"));
        assert_eq!(settings.bind, SocketAddr::from((Ipv4Addr::LOCALHOST, 0)));
        assert_eq!(settings.snapshot_path(), PathBuf::from("/tmp/db/snapshot.json"));
    }

    #[test]
    fn settings_reject_bad_port() {
        let err = DocStoreSettings::from_section(&section(&[("dbpath", "/tmp/db"), ("port", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "port"));
    }

    #[test]
    fn settings_require_dbpath() {
        let err = DocStoreSettings::from_section(&section(&[("port", "27017")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { ref key, .. } if key == "dbpath"));
    }
}
