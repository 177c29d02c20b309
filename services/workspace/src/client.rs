//! Typed client for the workspace JSON-RPC API.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::rpc::{ObjectData, ObjectIdentity, ObjectInfo, RpcError, RpcRequest, RpcResponse, SaveObjectParams};

#[derive(Debug, Error)]
pub enum WorkspaceClientError {
    #[error("workspace request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("workspace returned an error: {0}")]
    Rpc(#[from] RpcError),
    #[error("unexpected workspace response: {0}")]
    Decode(String),
}

/// Calls workspace methods over HTTP, optionally authenticated.
#[derive(Debug, Clone)]
pub struct WorkspaceClient {
    http: Client,
    url: Url,
    token: Option<String>,
}

impl WorkspaceClient {
    pub fn new(url: Url) -> Result<Self, WorkspaceClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| WorkspaceClientError::Transport {
                url: url.to_string(),
                source,
            })?;
        Ok(Self {
            http,
            url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn ver(&self) -> Result<String, WorkspaceClientError> {
        self.call_single("Workspace.ver", Vec::new()).await
    }

    pub async fn status(&self) -> Result<Value, WorkspaceClientError> {
        self.call_single("Workspace.status", Vec::new()).await
    }

    pub async fn save_object(
        &self,
        workspace: &str,
        name: &str,
        data: Value,
    ) -> Result<ObjectInfo, WorkspaceClientError> {
        let params = SaveObjectParams {
            workspace: workspace.to_owned(),
            name: name.to_owned(),
            data,
        };
        self.call_single("Workspace.save_object", vec![json!(params)])
            .await
    }

    pub async fn get_object(
        &self,
        workspace: &str,
        name: &str,
    ) -> Result<ObjectData, WorkspaceClientError> {
        let identity = ObjectIdentity {
            workspace: workspace.to_owned(),
            name: name.to_owned(),
        };
        self.call_single("Workspace.get_object", vec![json!(identity)])
            .await
    }

    /// Invoke `method` and decode the first element of the result array.
    pub async fn call_single<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, WorkspaceClientError> {
        let result = self.call(method, params).await?;
        let first = match result {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => return Err(WorkspaceClientError::Decode(format!("expected a result array, got {other}"))),
        };
        serde_json::from_value(first).map_err(|err| WorkspaceClientError::Decode(err.to_string()))
    }

    /// Invoke `method`, returning the raw `result` value.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, WorkspaceClientError> {
        let transport = |source| WorkspaceClientError::Transport {
            url: self.url.to_string(),
            source,
        };
        let mut request = self
            .http
            .post(self.url.clone())
            .json(&RpcRequest::new(method, params));
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, token);
        }
        let response: RpcResponse = request
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        Ok(response.into_result()?)
    }
}
