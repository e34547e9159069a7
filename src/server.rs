//! HTTP adapter for the image database
//!
//! Exposes the retrieval core over HTTP using axum.
//!
//! # Endpoints
//!
//! - `POST /images/:post_id` - Hash and store an image's channel planes
//! - `GET /images/:post_id` - Fetch a stored image's hash
//! - `DELETE /images/:post_id` - Remove an image
//! - `POST /query` - Rank stored images by similarity
//! - `GET /status` - Image count
//!
//! # Concurrency Model
//!
//! The whole core sits behind one `parking_lot::RwLock`. Queries, `GET`
//! and `/status` take the read lock and proceed in parallel; add and
//! remove take the write lock and run alone. The lock is held until the
//! response body is built, so readers never observe a half-applied
//! mutation.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use iqdb_core::{Error, HaarSignature, ImageDb};

const DEFAULT_LIMIT: usize = 10;

/// Shared application state: the whole core behind a single
/// readers-writer lock.
pub struct AppState {
    pub db: RwLock<ImageDb>,
}

/// Raw 128x128 channel planes, one byte per pixel, row-major.
#[derive(Debug, Deserialize)]
pub struct ChannelPlanes {
    pub r: Vec<u8>,
    pub g: Vec<u8>,
    pub b: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct AddImageRequest {
    pub channels: ChannelPlanes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageResponse {
    pub post_id: u64,
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostIdResponse {
    pub post_id: u64,
}

/// `POST /query` URL parameters.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub hash: Option<String>,
    pub limit: Option<usize>,
}

/// `POST /query` JSON body, used when no `hash` parameter is given.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub channels: Option<ChannelPlanes>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryMatch {
    pub post_id: u64,
    pub score: f32,
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub images: usize,
}

/// Error response carrying the status the core error maps to. The body
/// is always `{ "message": ... }`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn param(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.is_fatal() {
            tracing::error!("invariant violation: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!("request failed ({}): {}", self.status, self.message);
        let body = serde_json::json!({ "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

fn signature_from_channels(channels: &ChannelPlanes) -> Result<HaarSignature, ApiError> {
    Ok(HaarSignature::from_channels(
        &channels.r,
        &channels.g,
        &channels.b,
    )?)
}

/// POST /images/:post_id - Hash the channel planes and store the image.
///
/// Replaces any existing image with the same post id.
async fn add_image(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<u64>,
    body: Result<Json<AddImageRequest>, JsonRejection>,
) -> Result<Json<ImageResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::param(format!(
            "`POST /images` body must be {{ \"channels\": {{ \"r\": [], \"g\": [], \"b\": [] }} }}: {e}"
        ))
    })?;
    let signature = signature_from_channels(&request.channels)?;

    state.db.write().add(post_id, &signature)?;
    tracing::info!("added post #{}", post_id);

    Ok(Json(ImageResponse {
        post_id,
        hash: signature.to_hash(),
    }))
}

/// GET /images/:post_id - Return the stored hash, or 404.
async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<u64>,
) -> Result<Json<ImageResponse>, ApiError> {
    let db = state.db.read();
    let image = db.get(post_id)?.ok_or(Error::NotFound(post_id))?;

    Ok(Json(ImageResponse {
        post_id,
        hash: image.signature.to_hash(),
    }))
}

/// DELETE /images/:post_id - Remove an image. Unknown posts are ignored.
async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<u64>,
) -> Result<Json<PostIdResponse>, ApiError> {
    state.db.write().remove(post_id)?;
    tracing::info!("removed post #{}", post_id);

    Ok(Json(PostIdResponse { post_id }))
}

/// POST /query - Rank stored images against a query signature.
///
/// The signature comes from the `hash` URL parameter, or from channel
/// planes in the JSON body. `limit` may be given either way and defaults
/// to 10.
async fn query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
    body: Bytes,
) -> Result<Json<Vec<QueryMatch>>, ApiError> {
    let request: Option<QueryRequest> = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|e| ApiError::param(format!("invalid query body: {e}")))?,
        )
    };

    let signature = if let Some(hash) = &params.hash {
        HaarSignature::from_hash(hash)?
    } else if let Some(channels) = request.as_ref().and_then(|r| r.channels.as_ref()) {
        signature_from_channels(channels)?
    } else {
        return Err(ApiError::param(
            "POST /query requires either a `hash` param or a `channels` body",
        ));
    };

    let limit = params
        .limit
        .or_else(|| request.as_ref().and_then(|r| r.limit))
        .unwrap_or(DEFAULT_LIMIT);

    let db = state.db.read();
    let matches = db.query(&signature, limit);

    let mut results = Vec::with_capacity(matches.len());
    for m in matches {
        let stored = db.get(m.post_id)?.ok_or_else(|| {
            Error::Fatal(format!("query result post #{} missing from store", m.post_id))
        })?;
        results.push(QueryMatch {
            post_id: m.post_id,
            score: m.score,
            hash: stored.signature.to_hash(),
        });
    }

    Ok(Json(results))
}

/// GET /status - Image count, tombstones included.
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        images: state.db.read().count(),
    })
}

/// Create the axum router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/images/:post_id",
            post(add_image).get(get_image).delete(delete_image),
        )
        .route("/query", post(query))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the server and run until a shutdown signal arrives.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("listening on {}:{}", host, port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM; in-flight requests drain afterwards.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}
