#![doc = "Document store integration for the CLI: the concrete R2R v3 HTTP client behind the core `DocumentStore` trait."]
//
//! # Store Client (CLI <-> Core)
//!
//! [`R2rClient`] implements [`DocumentStore`] from `code-bucket-core` against the
//! R2R v3 API. Every call goes through the core
//! [`ResilientTransport`](code_bucket_core::transport::ResilientTransport), so
//! retry and backoff behaviour is the same for all endpoints.
//!
//! ## Client Usage
//!
//! - Obtain a client with [`R2rClient::login`]; it authenticates with the password
//!   flow and attaches the bearer token to every later request.
//! - Responses are wrapped in a `{"results": ...}` envelope, unwrapped here.
//! - The token and password are never logged.

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use code_bucket_core::contract::{
    Collection, DocumentStore, IngestionStatus, NewDocument, StoreError, UploadedDocument,
};
use code_bucket_core::transport::{Payload, ResilientTransport, RetryPolicy, TransportError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    results: T,
}

#[derive(Debug, Deserialize)]
struct LoginResults {
    access_token: AccessToken,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CollectionRecord {
    id: String,
    name: String,
}

impl From<CollectionRecord> for Collection {
    fn from(record: CollectionRecord) -> Self {
        Collection {
            id: record.id,
            name: record.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadRecord {
    #[serde(default)]
    document_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct DocumentRecord {
    #[serde(default)]
    ingestion_status: Option<String>,
}

pub struct R2rClient {
    api_url: String,
    transport: ResilientTransport,
}

impl R2rClient {
    /// Authenticates against `POST /v3/users/login` and returns a client that
    /// sends the issued bearer token.
    pub async fn login(
        api_url: &str,
        email: &str,
        password: &str,
        policy: RetryPolicy,
    ) -> Result<Self, StoreError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Transport(TransportError::Build(e.to_string())))?;
        let transport = ResilientTransport::new(client, policy);

        tracing::info!(api_url = %api_url, email, "Authenticating with document store");
        let response = transport
            .request(
                Method::POST,
                &format!("{api_url}/v3/users/login"),
                &Payload::Form(vec![
                    ("username".to_string(), email.to_string()),
                    ("password".to_string(), password.to_string()),
                ]),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Authentication request failed");
                e
            })?;
        let login: LoginResults = decode(response).await?;
        tracing::info!("Authenticated successfully");

        Ok(Self {
            api_url,
            transport: transport.with_bearer_token(login.access_token.token),
        })
    }

    /// `GET /v3/health`; returns the raw `results` payload.
    pub async fn health(&self) -> Result<serde_json::Value, StoreError> {
        let response = self
            .transport
            .request(Method::GET, &self.url("/v3/health"), &Payload::Empty)
            .await?;
        decode(response).await
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>, StoreError> {
        let response = self
            .transport
            .request(Method::GET, &self.url("/v3/collections"), &Payload::Empty)
            .await?;
        let records: Vec<CollectionRecord> = decode(response).await?;
        tracing::debug!(count = records.len(), "Fetched collections");
        Ok(records.into_iter().map(Collection::from).collect())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn count_graph_items(
        &self,
        collection_id: &str,
        kind: &str,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let url = self.url(&format!("/v3/graphs/{collection_id}/{kind}?limit={limit}"));
        let response = self
            .transport
            .request(Method::GET, &url, &Payload::Empty)
            .await?;
        let items: Vec<serde_json::Value> = decode(response).await?;
        Ok(items.len())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let url = response.url().to_string();
    let body = response
        .bytes()
        .await
        .map_err(|e| StoreError::Decode(format!("failed to read response from {url}: {e}")))?;
    let envelope: Envelope<T> = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(error = %e, url = %url, "Unexpected response body");
        StoreError::Decode(format!("{url}: {e}"))
    })?;
    Ok(envelope.results)
}

#[async_trait]
impl DocumentStore for R2rClient {
    async fn find_collection(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let found = self
            .list_collections()
            .await?
            .into_iter()
            .find(|c| c.name == name);
        tracing::debug!(collection = name, found = found.is_some(), "Looked up collection");
        Ok(found)
    }

    async fn create_collection(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Collection, StoreError> {
        tracing::info!(collection = name, "Creating collection");
        let response = self
            .transport
            .request(
                Method::POST,
                &self.url("/v3/collections"),
                &Payload::Json(serde_json::json!({
                    "name": name,
                    "description": description,
                })),
            )
            .await?;
        let record: CollectionRecord = decode(response).await?;
        tracing::info!(collection = name, id = %record.id, "Created collection");
        Ok(record.into())
    }

    async fn upload_document(&self, document: NewDocument) -> Result<UploadedDocument, StoreError> {
        let metadata = serde_json::to_string(&document.metadata)
            .map_err(|e| StoreError::Decode(format!("could not encode metadata: {e}")))?;
        let mut fields = vec![("metadata".to_string(), metadata)];
        if let Some(collection_id) = &document.collection_id {
            let ids = serde_json::to_string(&[collection_id])
                .map_err(|e| StoreError::Decode(format!("could not encode collection ids: {e}")))?;
            fields.push(("collection_ids".to_string(), ids));
        }
        fields.push(("id".to_string(), document.document_id.to_string()));

        tracing::debug!(
            document_id = %document.document_id,
            upload_name = %document.upload_name,
            bytes = document.content.len(),
            "Uploading document"
        );
        let response = self
            .transport
            .request(
                Method::POST,
                &self.url("/v3/documents"),
                &Payload::Multipart {
                    file_field: "file".to_string(),
                    file_name: document.upload_name,
                    bytes: document.content,
                    fields,
                },
            )
            .await?;
        let record: UploadRecord = decode(response).await?;
        Ok(UploadedDocument {
            document_id: record.document_id.unwrap_or(document.document_id),
        })
    }

    async fn document_status(&self, document_id: Uuid) -> Result<IngestionStatus, StoreError> {
        let response = self
            .transport
            .request(
                Method::GET,
                &self.url(&format!("/v3/documents/{document_id}")),
                &Payload::Empty,
            )
            .await?;
        let record: DocumentRecord = decode(response).await?;
        Ok(IngestionStatus::from_store(
            record.ingestion_status.as_deref().unwrap_or("pending"),
        ))
    }

    async fn pull_graph(&self, collection_id: &str) -> Result<(), StoreError> {
        self.transport
            .request(
                Method::POST,
                &self.url(&format!("/v3/graphs/{collection_id}/pull")),
                // body is the `force` flag
                &Payload::Json(serde_json::Value::Bool(false)),
            )
            .await?;
        tracing::info!(collection_id, "Knowledge graph pull started");
        Ok(())
    }

    async fn graph_entity_count(
        &self,
        collection_id: &str,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.count_graph_items(collection_id, "entities", limit).await
    }

    async fn graph_relationship_count(
        &self,
        collection_id: &str,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.count_graph_items(collection_id, "relationships", limit)
            .await
    }
}
