//! ---
//! hfs_section: "02-docstore"
//! hfs_subsection: "module"
//! hfs_type: "source"
//! hfs_scope: "code"
//! hfs_description: "HTTP client for the document store."
//! hfs_version: "v0.1.0"
//! hfs_owner: "tbd"
//! ---
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::wire::{CollectionList, DatabaseList, Documents, Dropped, ErrorBody, Health, Inserted};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid store address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("store at {address} is unreachable")]
    Unreachable {
        address: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("store answered {status} for {url}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },
}

/// Connection to a running document store.
#[derive(Debug, Clone)]
pub struct DocStoreClient {
    http: Client,
    base: Url,
}

impl DocStoreClient {
    /// Connect to the store at `host:port` and confirm it answers.
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidAddress {
            address: address.to_owned(),
            reason,
        };
        let address = address.trim();
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => return Err(invalid("expected host:port".into())),
        }
        let base = Url::parse(&format!("http://{address}/")).map_err(|err| invalid(err.to_string()))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ClientError::Unreachable {
                address: address.to_owned(),
                source,
            })?;

        let client = Self { http, base };
        let health: Health = client
            .send(client.request(Method::GET, &["healthz"]))
            .await
            .map_err(|err| match err {
                ClientError::Request { source, .. } => ClientError::Unreachable {
                    address: address.to_owned(),
                    source,
                },
                other => other,
            })?;
        debug!(address, status = %health.status, "connected to document store");
        Ok(client)
    }

    /// `host:port` of the store.
    pub fn address(&self) -> String {
        match (self.base.host_str(), self.base.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            _ => self.base.to_string(),
        }
    }

    pub async fn database_names(&self) -> Result<Vec<String>, ClientError> {
        let list: DatabaseList = self.send(self.request(Method::GET, &["db"])).await?;
        Ok(list.databases)
    }

    pub fn database(&self, name: &str) -> DatabaseHandle {
        DatabaseHandle {
            client: self.clone(),
            name: name.to_owned(),
        }
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.clear().extend(segments);
        }
        self.http.request(method, url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = self.execute(request).await?;
        let url = response.url().to_string();
        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Request { url, source })
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await.map_err(|source| ClientError::Request {
            url: source
                .url()
                .map(Url::to_string)
                .unwrap_or_else(|| self.base.to_string()),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown").to_owned(),
        };
        Err(ClientError::Status {
            url,
            status: status.as_u16(),
            message,
        })
    }
}

/// One database of the store.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    client: DocStoreClient,
    name: String,
}

impl DatabaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn collection_names(&self) -> Result<Vec<String>, ClientError> {
        let list: CollectionList = self
            .client
            .send(self.client.request(Method::GET, &["db", &self.name]))
            .await?;
        Ok(list.collections)
    }

    pub async fn drop_collection(&self, collection: &str) -> Result<bool, ClientError> {
        let dropped: Dropped = self
            .client
            .send(
                self.client
                    .request(Method::DELETE, &["db", &self.name, collection]),
            )
            .await?;
        Ok(dropped.dropped)
    }

    /// Drop the whole database.
    pub async fn drop(&self) -> Result<bool, ClientError> {
        let dropped: Dropped = self
            .client
            .send(self.client.request(Method::DELETE, &["db", &self.name]))
            .await?;
        Ok(dropped.dropped)
    }

    pub fn collection(&self, name: &str) -> CollectionHandle {
        CollectionHandle {
            client: self.client.clone(),
            database: self.name.clone(),
            name: name.to_owned(),
        }
    }
}

/// One collection of a database.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    client: DocStoreClient,
    database: String,
    name: String,
}

impl CollectionHandle {
    /// Insert or replace `document`, returning its `_id`.
    pub async fn insert(&self, document: &Value) -> Result<String, ClientError> {
        let inserted: Inserted = self
            .client
            .send(
                self.client
                    .request(Method::POST, &["db", &self.database, &self.name])
                    .json(document),
            )
            .await?;
        Ok(inserted.id)
    }

    /// Documents whose string fields equal every `(field, value)` pair.
    pub async fn find(&self, filter: &[(&str, &str)]) -> Result<Vec<Value>, ClientError> {
        let documents: Documents = self
            .client
            .send(
                self.client
                    .request(Method::GET, &["db", &self.database, &self.name])
                    .query(filter),
            )
            .await?;
        Ok(documents.documents)
    }

    /// Fetch a document by id; `None` when it does not exist.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, ClientError> {
        let request = self
            .client
            .request(Method::GET, &["db", &self.database, &self.name, id]);
        match self.client.send(request).await {
            Ok(document) => Ok(Some(document)),
            Err(ClientError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_addresses_without_port() {
        let err = DocStoreClient::connect("localhost").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn connect_reports_unreachable_store() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = DocStoreClient::connect(&format!("127.0.0.1:{port}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable { .. }));
    }
}
