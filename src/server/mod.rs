//! The reference remote document store served over HTTP.
//!
//! # Endpoints
//!
//! - `GET /health`: health check (no auth required)
//! - `GET /me`: the user behind the API key
//! - `POST /v1/query`: documents of a collection changed since a cursor
//! - `POST /v1/document`: a single document
//! - `POST /v1/commit`: an atomic batch of writes

pub mod auth;
pub mod config;
pub mod handlers;
pub mod storage;

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::sync::protocol::{COMMIT_ROUTE, DOCUMENT_ROUTE, HEALTH_ROUTE, ME_ROUTE, QUERY_ROUTE};
pub use config::{ApiKeyStore, AuthUser, ServerConfig, ServerConfigFile};
pub use storage::{DocumentStore, StorageError};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub shared_collections: Arc<HashSet<String>>,
    pub documents: DocumentStore,
}

impl AppState {
    pub fn new(config: ServerConfigFile, documents: DocumentStore) -> Self {
        Self {
            api_keys: Arc::new(ApiKeyStore::from_entries(config.api_keys)),
            shared_collections: Arc::new(config.shared_collections.into_iter().collect()),
            documents,
        }
    }
}

/// Build router
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route(HEALTH_ROUTE, get(handlers::health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(ME_ROUTE, get(handlers::me))
        .route(QUERY_ROUTE, post(handlers::query))
        .route(DOCUMENT_ROUTE, post(handlers::document))
        .route(COMMIT_ROUTE, post(handlers::commit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
