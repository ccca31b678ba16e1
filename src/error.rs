use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::utils::error_codes;

/// 规则校验过程中的错误
///
/// 配额拒绝不属于错误，拒绝结果通过 `Decision` 正常返回。
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// 未知的策略标识，或规则缺少必需的条件字段
    #[error("configuration error: {0}")]
    Configuration(String),
    /// 请求上下文缺少必需字段
    #[error("missing required context fields: {}", .missing.join(", "))]
    ContractViolation { missing: Vec<&'static str> },
    /// 计数存储不可用，不做重试也不做默认放行/拒绝
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),
}

impl QuotaError {
    pub fn configuration(message: impl Into<String>) -> Self {
        QuotaError::Configuration(message.into())
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Quota(QuotaError),
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        AppError::Quota(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    error_message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                message,
            ),
            AppError::Quota(err @ QuotaError::Configuration(_)) => {
                tracing::warn!("Rejected rule configuration: {}", err);
                (
                    StatusCode::BAD_REQUEST,
                    error_codes::CONFIGURATION_ERROR,
                    err.to_string(),
                )
            }
            AppError::Quota(err @ QuotaError::ContractViolation { .. }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_codes::CONTRACT_VIOLATION,
                err.to_string(),
            ),
            AppError::Quota(err @ QuotaError::StoreUnavailable(_)) => {
                tracing::error!("Counter store failure: {}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    error_codes::STORE_UNAVAILABLE,
                    err.to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code,
            error_message,
        });

        (status, body).into_response()
    }
}
