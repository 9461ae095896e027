//! Route handlers and the error response type.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};

use super::auth::authorize;
use super::config::AuthUser;
use super::storage::{parse_path, StorageError};
use super::AppState;
use crate::sync::protocol::{
    CommitRequest, CommitResponse, DocumentRequest, DocumentResponse, ErrorBody, HealthResponse,
    MeResponse, QueryRequest, QueryResponse,
};
use crate::sync::MAX_BATCH_SIZE;

/// A failed request, rendered as an [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidPath(_) | StorageError::WrongKind { .. } => {
                ApiError::bad_request(e.to_string())
            }
            StorageError::Database(_) | StorageError::Corrupt(_) => {
                tracing::error!(error = %e, "Storage failure");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        }
    }
}

/// Health check endpoint (no auth required)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get current user info (auth required)
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
    })
}

pub async fn query(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let (_, segments) = parse_path(&request.path)?;
    authorize(&state, &user, &segments)?;

    let documents = state.documents.query(&request.path, request.since).await?;
    tracing::debug!(path = %request.path, count = documents.len(), "Query");
    Ok(Json(QueryResponse { documents }))
}

pub async fn document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<DocumentRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let (_, segments) = parse_path(&request.path)?;
    authorize(&state, &user, &segments)?;

    let document = state.documents.get(&request.path).await?;
    Ok(Json(DocumentResponse { document }))
}

pub async fn commit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    if request.writes.len() > MAX_BATCH_SIZE {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "batch_too_large",
            format!(
                "batch of {} writes exceeds the limit of {}",
                request.writes.len(),
                MAX_BATCH_SIZE
            ),
        ));
    }

    for write in &request.writes {
        let (_, segments) = parse_path(&write.path)?;
        authorize(&state, &user, &segments)?;
    }

    let committed = state.documents.commit(&request.writes).await?;
    tracing::info!(user_id = %user.user_id, committed, "Committed batch");
    Ok(Json(CommitResponse { committed }))
}
