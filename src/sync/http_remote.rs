//! [`RemoteStore`] over the document store HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::StoreError;
use super::protocol::{
    CommitRequest, CommitResponse, DocumentRequest, DocumentResponse, ErrorBody, MeResponse,
    QueryRequest, QueryResponse, COMMIT_ROUTE, DOCUMENT_ROUTE, ME_ROUTE, QUERY_ROUTE,
};
use super::record::SyncRecord;
use super::remote::{BatchWrite, RemoteStore};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to a `fitsync-server` with a bearer API key.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R, StoreError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(route))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<R>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);
    Err(status_error(status, message))
}

/// Maps a non-2xx status to the matching store error.
pub fn status_error(status: StatusCode, message: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthenticated(message),
        StatusCode::FORBIDDEN => StoreError::PermissionDenied(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => StoreError::Timeout(message),
        StatusCode::TOO_MANY_REQUESTS => {
            StoreError::Unavailable(format!("HTTP 429 too many requests: {}", message))
        }
        StatusCode::PAYLOAD_TOO_LARGE => StoreError::QuotaExceeded(message),
        s if s.is_server_error() => {
            StoreError::Unavailable(format!("HTTP {}: {}", s.as_u16(), message))
        }
        s if s.is_client_error() => StoreError::InvalidData(message),
        s => StoreError::Backend(format!("unexpected HTTP {}: {}", s.as_u16(), message)),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn ensure_ready(&self, user_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .get(self.url(ME_ROUTE))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let me: MeResponse = decode(response).await?;
        if me.user_id != user_id {
            return Err(StoreError::PermissionDenied(format!(
                "API key belongs to {}, not {}",
                me.user_id, user_id
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection_path: &str,
        _user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError> {
        let request = QueryRequest {
            path: collection_path.to_string(),
            since,
        };
        let response: QueryResponse = self.post(QUERY_ROUTE, &request).await?;
        tracing::debug!(
            path = collection_path,
            documents = response.documents.len(),
            "Remote query"
        );
        Ok(response.documents)
    }

    async fn get_document(&self, path: &str) -> Result<Option<SyncRecord>, StoreError> {
        let request = DocumentRequest {
            path: path.to_string(),
        };
        let response: DocumentResponse = self.post(DOCUMENT_ROUTE, &request).await?;
        Ok(response.document)
    }

    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<(), StoreError> {
        let expected = writes.len();
        let response: CommitResponse = self.post(COMMIT_ROUTE, &CommitRequest { writes }).await?;
        if response.committed != expected {
            return Err(StoreError::Backend(format!(
                "server committed {} of {} writes",
                response.committed, expected
            )));
        }
        Ok(())
    }
}
