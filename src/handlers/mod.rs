use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::state::AppState;

pub mod page;
pub mod wizard;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("找不到檔案 {0}，請重新上傳。")]
    AssetNotFound(String),
    #[error(transparent)]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::AssetNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Multipart(err) => (err.status(), err.body_text()),
            ApiError::Internal(err) => {
                error!("Request failed: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "伺服器發生錯誤，請稍後再試。".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(page::index))
        .route("/healthz", get(healthz))
        .route("/api/upload", post(wizard::upload))
        .route("/api/assets/{id}", get(wizard::asset_content))
        .route("/api/generate", post(wizard::generate))
        .route("/api/edit", post(wizard::edit))
        .route("/api/presentation", post(wizard::presentation))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
