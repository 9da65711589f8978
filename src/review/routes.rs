//! HTTP endpoints for the review screens.
//!
//! Stands in for the chat transport: clients post submitted screen data or
//! free text and get the next screen back as JSON.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use super::codec::ActionPayload;
use super::model::Requester;
use super::service::ReviewService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReviewService>,
}

/// Build the Axum router with the review REST routes.
pub fn review_routes(service: Arc<ReviewService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .route("/api/actions", post(submit_action))
        .route("/api/messages", post(submit_message))
        .route("/api/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rfi-review"
    }))
}

// ── Actions ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ActionRequest {
    #[serde(default)]
    requester: Requester,
    /// Submitted screen data; anything but an object decodes as empty.
    #[serde(default)]
    data: Value,
}

async fn submit_action(
    State(state): State<AppState>,
    Json(body): Json<ActionRequest>,
) -> impl IntoResponse {
    let payload = ActionPayload::from_json(&body.data);
    info!(
        requester = %body.requester.name,
        action = payload.action().unwrap_or_default(),
        "Action submitted"
    );
    Json(state.service.handle_action(&payload, &body.requester).await)
}

// ── Messages ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageRequest {
    #[serde(default)]
    text: String,
}

async fn submit_message(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> impl IntoResponse {
    debug!(len = body.text.len(), "Message received");
    Json(state.service.handle_message(&body.text).await)
}

// ── Status ──────────────────────────────────────────────────────────────

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status_screen().await)
}
