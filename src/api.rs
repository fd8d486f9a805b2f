//! HTTP API over the collector.
//!
//! GET  /health                  -> "OK"
//! GET  /                        -> packets captured so far
//! GET  /collect                 -> packets captured since the last collect, then cleared
//! POST /collect/file/{filename} -> same as /collect, written to `filename`

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bridgetap_capture::Collector;
use bridgetap_core::error::PersistenceError;
use bridgetap_core::packet::HttpPacket;
use serde::Serialize;

struct ApiError(PersistenceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        tracing::error!("collect to file failed: {message}");
        (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}

#[derive(Serialize)]
struct CollectedFile {
    filename: String,
    count: usize,
}

/// Logs each request as "METHOD PATH - STATUS".
async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    tracing::info!("{} {} - {}", method, uri, response.status().as_u16());
    response
}

async fn health() -> &'static str {
    "OK"
}

async fn get_packets(State(collector): State<Collector>) -> Json<Vec<HttpPacket>> {
    Json(collector.get_all())
}

async fn collect(State(collector): State<Collector>) -> Json<Vec<HttpPacket>> {
    Json(collector.collect())
}

async fn collect_to_file(
    State(collector): State<Collector>,
    Path(filename): Path<String>,
) -> Result<Json<CollectedFile>, ApiError> {
    let count = collector.collect_to_file(&filename).map_err(ApiError)?;
    Ok(Json(CollectedFile { filename, count }))
}

pub fn router(collector: Collector) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(get_packets))
        .route("/collect", get(collect))
        .route("/collect/file/{filename}", post(collect_to_file))
        .layer(middleware::from_fn(request_logging))
        .with_state(collector)
}
