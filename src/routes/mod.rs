pub mod rule;

use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::utils::{error_codes, error_to_api_response};

pub async fn health() -> &'static str {
    "ok"
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        error_to_api_response(error_codes::NOT_FOUND, "route not found"),
    )
}
