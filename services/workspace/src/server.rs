//! Workspace server: a JSON-RPC front end over one document store database.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use hfs_common::{loopback, ManagedService, ServerControl, TokenValidator, UnverifiedTokenValidator};
use hfs_docstore::{ClientError, DatabaseHandle, DocStoreClient};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::WorkspaceSettings;
use crate::rpc::{
    ObjectData, ObjectIdentity, ObjectInfo, RpcError, RpcRequest, RpcResponse, SaveObjectParams,
    AUTH_REQUIRED, INVALID_REQUEST, NO_SUCH_OBJECT, PARSE_ERROR,
};

/// Collection holding the workspace settings document.
pub const SETTINGS_COLLECTION: &str = "settings";
/// `_id` of the settings document.
pub const SETTINGS_ID: &str = "settings";
/// Collection holding saved objects.
pub const OBJECTS_COLLECTION: &str = "objects";
/// Backend name recorded by [`initialize_workspace_db`].
pub const BACKEND: &str = "docstore";

/// Server version reported by `Workspace.ver`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Write the settings document a workspace server requires before it starts.
pub async fn initialize_workspace_db(
    database: &DatabaseHandle,
    type_database: &str,
) -> Result<(), ClientError> {
    database
        .collection(SETTINGS_COLLECTION)
        .insert(&json!({
            "_id": SETTINGS_ID,
            "backend": BACKEND,
            "type_database": type_database,
        }))
        .await?;
    info!(database = %database.name(), type_database, "workspace database initialised");
    Ok(())
}

/// The workspace server as a managed service.
#[derive(Debug)]
pub struct WorkspaceServer {
    control: ServerControl,
}

impl Default for WorkspaceServer {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceServer {
    pub fn new() -> Self {
        Self {
            control: ServerControl::new("workspace"),
        }
    }

    /// Connect to the store, check the database was initialised and serve
    /// until stopped. Blocks the calling thread.
    pub fn run(&self, settings: &WorkspaceSettings) -> anyhow::Result<()> {
        std::fs::create_dir_all(&settings.scratch_dir).with_context(|| {
            format!(
                "unable to create scratch dir {}",
                settings.scratch_dir.display()
            )
        })?;
        if settings.ignore_handle_service {
            info!("handle service checks disabled");
        }

        let settings = Arc::new(settings.clone());
        self.control
            .run(loopback(settings.port), || build_router(settings))
    }
}

impl ManagedService for WorkspaceServer {
    fn name(&self) -> &str {
        self.control.name()
    }

    fn startup(&self, config_path: &Path) -> anyhow::Result<()> {
        let settings = WorkspaceSettings::load(config_path)?;
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

#[derive(Clone)]
struct AppState {
    database: DatabaseHandle,
    validator: Arc<dyn TokenValidator>,
}

async fn build_router(settings: Arc<WorkspaceSettings>) -> anyhow::Result<Router> {
    let client = DocStoreClient::connect(&settings.store_host)
        .await
        .context("workspace cannot reach the document store")?;
    let database = client.database(&settings.store_database);

    let Some(stored) = database
        .collection(SETTINGS_COLLECTION)
        .get(SETTINGS_ID)
        .await?
    else {
        bail!(
            "database {} has no workspace settings; run initialize_workspace_db first",
            settings.store_database
        );
    };
    if stored.get("backend").and_then(Value::as_str) != Some(BACKEND) {
        bail!(
            "database {} is configured for backend {:?}",
            settings.store_database,
            stored.get("backend")
        );
    }
    info!(
        store = %settings.store_host,
        database = %settings.store_database,
        type_database = ?stored.get("type_database"),
        admin = %settings.admin_identity,
        "workspace settings loaded"
    );

    let state = AppState {
        database,
        validator: Arc::new(UnverifiedTokenValidator::new(settings.admin_identity.clone())),
    };
    Ok(Router::new()
        .route("/", post(handle_rpc))
        .route("/rpc", post(handle_rpc))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: RpcRequest = match serde_json::from_slice::<Value>(&body) {
        Err(err) => return reply(RpcResponse::failure(None, RpcError::new(PARSE_ERROR, err.to_string()))),
        Ok(raw) => match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(err) => {
                return reply(RpcResponse::failure(
                    None,
                    RpcError::new(INVALID_REQUEST, err.to_string()),
                ))
            }
        },
    };

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start_matches("Bearer ").trim().to_owned())
        .filter(|value| !value.is_empty());

    let id = request.id.clone();
    let outcome = match request.method.as_str() {
        "Workspace.ver" => Ok(json!([SERVER_VERSION])),
        "Workspace.status" => status(&state).await,
        "Workspace.save_object" => save_object(&state, token.as_deref(), &request.params).await,
        "Workspace.get_object" => get_object(&state, &request.params).await,
        other => Err(RpcError::method_not_found(other)),
    };

    match outcome {
        Ok(result) => reply(RpcResponse::success(id, result)),
        Err(error) => {
            warn!(method = %request.method, code = error.code, message = %error.message, "rpc call failed");
            reply(RpcResponse::failure(id, error))
        }
    }
}

fn reply(response: RpcResponse) -> Response {
    let status = if response.error.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

fn first_param<T: DeserializeOwned>(params: &[Value]) -> Result<T, RpcError> {
    let first = params
        .first()
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("expected one parameter"))?;
    serde_json::from_value(first).map_err(RpcError::invalid_params)
}

fn object_id(workspace: &str, name: &str) -> String {
    format!("{workspace}/{name}")
}

async fn status(state: &AppState) -> Result<Value, RpcError> {
    let store = match state.database.collection_names().await {
        Ok(_) => "OK",
        Err(err) => {
            warn!(error = %err, "store status check failed");
            "FAIL"
        }
    };
    Ok(json!([{
        "state": store,
        "version": SERVER_VERSION,
        "dependencies": [{"name": "DocStore", "state": store}],
    }]))
}

async fn save_object(
    state: &AppState,
    token: Option<&str>,
    params: &[Value],
) -> Result<Value, RpcError> {
    let token = token.ok_or_else(|| {
        RpcError::new(AUTH_REQUIRED, "Authorization is required for Workspace.save_object")
    })?;
    let user = state
        .validator
        .validate(token)
        .map_err(|err| RpcError::new(AUTH_REQUIRED, err.to_string()))?;
    let params: SaveObjectParams = first_param(params)?;
    if params.workspace.is_empty() || params.name.is_empty() {
        return Err(RpcError::invalid_params("workspace and name must be non-empty"));
    }

    let info = ObjectInfo {
        workspace: params.workspace.clone(),
        name: params.name.clone(),
        saved_by: user.user_name().to_owned(),
        saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    let document = json!({
        "_id": object_id(&params.workspace, &params.name),
        "data": params.data,
        "info": info,
    });
    state
        .database
        .collection(OBJECTS_COLLECTION)
        .insert(&document)
        .await
        .map_err(RpcError::server)?;
    Ok(json!([info]))
}

async fn get_object(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let identity: ObjectIdentity = first_param(params)?;
    let stored = state
        .database
        .collection(OBJECTS_COLLECTION)
        .get(&object_id(&identity.workspace, &identity.name))
        .await
        .map_err(RpcError::server)?
        .ok_or_else(|| {
            RpcError::new(
                NO_SUCH_OBJECT,
                format!(
                    "No object with name {} exists in workspace {}",
                    identity.name, identity.workspace
                ),
            )
        })?;
    let object: ObjectData = serde_json::from_value(stored).map_err(RpcError::server)?;
    Ok(json!([object]))
}
