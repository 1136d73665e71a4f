//! Defines the HTTP surface of the share service.
//!
//! ## Structure
//! - **Share endpoints**
//!   - `POST   /upload`       : store a file (password-gated, multipart)
//!   - `GET    /files/{id}`   : metadata of a live share
//!   - `DELETE /files/{id}`   : remove a share early (password-gated)
//!   - `GET    /download/{id}`: stream the payload as an attachment
//!
//! - **Health checks**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        share_handlers::{delete_file, download, file_metadata, upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for all share routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload))
        .route("/files/{id}", get(file_metadata).delete(delete_file))
        .route("/download/{id}", get(download))
}

/// Routes plus state, with request bodies capped at `body_limit` bytes.
pub fn app(state: AppState, body_limit: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
