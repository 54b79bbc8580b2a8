//! HTTP boundary over the submission interface.
//!
//! - POST `/message` - append one message body, answer after it is durable
//! - GET `/status` - current sequence, format version, configuration
//! - GET `/health` - write-path counters

use std::future::Future;
use std::io;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::writer::LogWriter;
use crate::Error;

#[derive(Clone)]
struct AppState {
    writer: LogWriter,
}

/// Builds the service router around an engine handle. The handle is the only
/// state the HTTP layer holds.
pub fn router(writer: LogWriter) -> Router {
    let body_limit = writer.config().max_body_size;
    Router::new()
        .route("/message", post(submit_message))
        .route("/status", get(show_status))
        .route("/health", get(show_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState { writer })
}

/// Serves until the shutdown future resolves; in-flight submissions finish
/// before the listener closes.
pub async fn serve(
    listener: TcpListener,
    writer: LogWriter,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    axum::serve(listener, router(writer))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Serialize)]
struct MessageResponse {
    sequence: u64,
    hash: String,
}

#[derive(Serialize)]
struct StatusResponse {
    version: u64,
    next_sequence: u64,
    data_dir: String,
    max_body_size: usize,
    max_queue_depth: usize,
    max_pending_acks: usize,
    coalesce_interval_ms: u64,
    max_bytes_per_segment: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    records_appended: u64,
    append_errors: u64,
    flushes: u64,
}

async fn submit_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // A declared length is part of the submission contract; chunked uploads
    // are not accepted.
    if !headers.contains_key(header::CONTENT_LENGTH) {
        return error_response(
            StatusCode::LENGTH_REQUIRED,
            "content length must be declared",
        );
    }
    match state.writer.submit(body.to_vec()).await {
        Ok(ack) => (
            StatusCode::OK,
            Json(MessageResponse {
                sequence: ack.sequence,
                hash: ack.hash,
            }),
        )
            .into_response(),
        Err(err) => {
            let status = match &err {
                Error::EmptyBody => StatusCode::BAD_REQUEST,
                Error::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                Error::Closed => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, &err.to_string())
        }
    }
}

async fn show_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let config = state.writer.config();
    Json(StatusResponse {
        version: state.writer.version(),
        next_sequence: state.writer.stats().next_sequence,
        data_dir: config.data_dir.display().to_string(),
        max_body_size: config.max_body_size,
        max_queue_depth: config.max_queue_depth,
        max_pending_acks: config.max_pending_acks,
        coalesce_interval_ms: config.coalesce_interval.as_millis() as u64,
        max_bytes_per_segment: config.max_bytes_per_segment,
    })
}

async fn show_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.writer.stats();
    Json(HealthResponse {
        status: "ok",
        records_appended: stats.records_appended,
        append_errors: stats.append_errors,
        flushes: stats.flushes,
    })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
