//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay serves one WebSocket endpoint carrying STOMP frames and a
//! health check. There is no persistence; room fan-out lives in
//! [`RelayState`].

pub mod ws;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::RelayState;

pub fn app(state: RelayState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/chat/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    topics: usize,
}

async fn healthz(State(state): State<RelayState>) -> Json<Health> {
    Json(Health { status: "ok", topics: state.topic_count().await })
}
