//! HTTP front end serving HTML documents stored in workspace objects.
//!
//! Every request for `/api/v1/{workspace}/{object}` is turned into a
//! `Workspace.get_object` call. The caller's `Authorization` header is passed
//! through untouched so the workspace applies its own access rules.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hfs_common::{loopback, ManagedService, ServerControl};
use hfs_workspace::rpc::NO_SUCH_OBJECT;
use hfs_workspace::{WorkspaceClient, WorkspaceClientError};
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

use crate::config::HtmlServSettings;

/// The HTML FileSet server as a managed service.
#[derive(Debug)]
pub struct HtmlFileSetServer {
    control: ServerControl,
}

impl Default for HtmlFileSetServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlFileSetServer {
    pub fn new() -> Self {
        Self {
            control: ServerControl::new("htmlserv"),
        }
    }

    /// Probe the workspace and serve until stopped. Blocks the calling thread.
    pub fn run(&self, settings: &HtmlServSettings) -> anyhow::Result<()> {
        std::fs::create_dir_all(&settings.scratch_dir).with_context(|| {
            format!(
                "unable to create scratch dir {}",
                settings.scratch_dir.display()
            )
        })?;
        let settings = Arc::new(settings.clone());
        self.control
            .run(loopback(settings.port), || build_router(settings))
    }
}

impl ManagedService for HtmlFileSetServer {
    fn name(&self) -> &str {
        self.control.name()
    }

    fn startup(&self, config_path: &Path) -> anyhow::Result<()> {
        let settings = HtmlServSettings::load(config_path)?;
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

/// Shared state handed to each handler.
#[derive(Clone)]
struct AppState {
    workspace: WorkspaceClient,
    workspace_version: Arc<str>,
}

/// Errors a handler can surface; each maps onto one HTTP status.
#[derive(Debug, Error)]
enum AppError {
    #[error("object {workspace}/{object} not found")]
    NotFound { workspace: String, object: String },

    #[error("object {workspace}/{object} has no html content")]
    NoHtml { workspace: String, object: String },

    #[error("workspace call failed: {0}")]
    Workspace(#[from] WorkspaceClientError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound { .. } | AppError::NoHtml { .. } => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            // Upstream details stay in the log.
            AppError::Workspace(err) => {
                error!(error = %err, "serving 502 due to workspace failure");
                (StatusCode::BAD_GATEWAY, "workspace unavailable").into_response()
            }
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    workspace_version: String,
}

async fn build_router(settings: Arc<HtmlServSettings>) -> anyhow::Result<Router> {
    let workspace = WorkspaceClient::new(settings.endpoint_url.clone())?;
    let version = workspace.ver().await.with_context(|| {
        format!(
            "workspace at {} did not answer Workspace.ver",
            settings.endpoint_url
        )
    })?;
    info!(workspace = %settings.endpoint_url, version = %version, "workspace reachable");

    let state = AppState {
        workspace,
        workspace_version: Arc::from(version),
    };
    Ok(Router::new()
        .route("/", get(landing))
        .route("/healthz", get(healthz))
        .route("/api/v1/:workspace/:object", get(serve_object))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

async fn landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><title>HTML FileSet Server</title></head>\
         <body><h1>HTML FileSet Server</h1>\
         <p>Workspace: {} (version {})</p>\
         <p>Objects are served from <code>/api/v1/&lt;workspace&gt;/&lt;object&gt;</code>.</p>\
         </body></html>\n",
        state.workspace.url(),
        state.workspace_version
    ))
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        workspace_version: state.workspace_version.to_string(),
    })
}

#[instrument(skip(state, headers))]
async fn serve_object(
    State(state): State<AppState>,
    UrlPath((workspace, object)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let client = match headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(token) => state.workspace.clone().with_token(token),
        None => state.workspace.clone(),
    };

    let stored = match client.get_object(&workspace, &object).await {
        Ok(stored) => stored,
        Err(WorkspaceClientError::Rpc(err)) if err.code == NO_SUCH_OBJECT => {
            return Err(AppError::NotFound { workspace, object })
        }
        Err(err) => return Err(err.into()),
    };

    match stored.data.get("html").and_then(|html| html.as_str()) {
        Some(html) => Ok(Html(html.to_owned())),
        None => Err(AppError::NoHtml { workspace, object }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_objects_map_to_404() {
        let response = AppError::NotFound {
            workspace: "w".into(),
            object: "o".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn workspace_failures_map_to_502() {
        let err = WorkspaceClientError::Decode("garbage".into());
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
