use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use log::error;
use serde::Deserialize;
use std::sync::Arc as StdArc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::{download_filename, Catalog};
use crate::error::CatalogError;
use crate::janitor;

// State for catalog handlers
pub struct AppState {
    pub catalog: Catalog,
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

/// Build the catalog API router
pub fn build_router(catalog: Catalog) -> Router {
    let app_state = StdArc::new(AppState { catalog });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/recordings", get(list_handler))
        .route("/api/recordings/{id}/download", get(download_handler))
        .route("/api/recordings/{id}/title", put(rename_handler))
        .route("/api/recordings/{id}", get(get_handler).delete(delete_handler))
        .layer(cors)
        .with_state(app_state)
}

/// Serve the catalog over HTTP until interrupted
///
/// A staged chunk sweep runs for the lifetime of the server.
pub async fn serve_catalog(
    catalog: Catalog,
    port: u16,
    retention: Duration,
    sweep_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  GET    /health");
    println!("  GET    /api/recordings");
    println!("  GET    /api/recordings/:id");
    println!("  GET    /api/recordings/:id/download");
    println!("  PUT    /api/recordings/:id/title");
    println!("  DELETE /api/recordings/:id");

    let cancel = CancellationToken::new();
    let sweep = janitor::spawn_sweep_task(
        StdArc::clone(catalog.store()),
        sweep_interval,
        retention,
        None,
        cancel.clone(),
    );

    let app = build_router(catalog);
    let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port))
        .await
        .map_err(|e| format!("Failed to bind to port {}: {}", port, e))?;

    let shutdown = cancel.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await;

    cancel.cancel();
    let _ = sweep.await;
    result.map_err(|e| format!("Server error: {}", e))?;
    Ok(())
}

fn catalog_error_response(e: CatalogError) -> Response {
    match e {
        CatalogError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Recording {} not found", id)})),
        )
            .into_response(),
        other => {
            error!("Catalog request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": other.to_string()})),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_handler(State(state): State<StdArc<AppState>>) -> Response {
    match state.catalog.list().await {
        Ok(recordings) => Json(recordings).into_response(),
        Err(e) => catalog_error_response(e),
    }
}

async fn get_handler(State(state): State<StdArc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.catalog.get(id).await {
        Ok(recording) => Json(recording).into_response(),
        Err(e) => catalog_error_response(e),
    }
}

async fn download_handler(
    State(state): State<StdArc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    let summary = match state.catalog.get(id).await {
        Ok(summary) => summary,
        Err(e) => return catalog_error_response(e),
    };
    let payload = match state.catalog.payload(id).await {
        Ok(payload) => payload,
        Err(e) => return catalog_error_response(e),
    };

    let filename = download_filename(&summary.title, summary.created_at_ms, &summary.mime_type);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let content_type = HeaderValue::from_str(&summary.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(payload),
    )
        .into_response()
}

async fn rename_handler(
    State(state): State<StdArc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<RenameRequest>,
) -> Response {
    let title = request.title.trim();
    if title.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Title must not be empty"})),
        )
            .into_response();
    }
    match state.catalog.rename(id, title).await {
        Ok(recording) => Json(recording).into_response(),
        Err(e) => catalog_error_response(e),
    }
}

async fn delete_handler(State(state): State<StdArc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.catalog.delete(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => catalog_error_response(e),
    }
}
