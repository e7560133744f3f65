// src/api.rs
//! HTTP trigger surface: `POST /run` starts one invocation, `GET /health`
//! answers liveness probes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::ingest::scheduler::JobRunner;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
}

pub fn router(runner: Arc<JobRunner>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/run", post(run))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { runner })
}

async fn run(State(state): State<AppState>) -> Response {
    let Some(result) = state.runner.try_run().await else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "busy", "message": "an invocation is already running" })),
        )
            .into_response();
    };

    match result {
        Ok(outcome) => {
            let status = if outcome.failure().is_some() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            let mut body = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
            if let (Some(e), Some(obj)) = (outcome.failure(), body.as_object_mut()) {
                obj.insert("error".into(), json!(e.kind()));
                obj.insert("message".into(), json!(e.to_string()));
            }
            (status, Json(body)).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.kind(), "message": e.to_string() })),
        )
            .into_response(),
    }
}
