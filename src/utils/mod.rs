use axum::Json;
use serde::Serialize;

use crate::result::ApiResult;

pub mod window;

pub use window::expiry_seconds;

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResult<T>> {
    ApiResult::success(data).into_json()
}

pub fn error_to_api_response(code: i32, msg: &str) -> Json<ApiResult<()>> {
    ApiResult::error(code, msg).into_json()
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const CONFIGURATION_ERROR: i32 = 1001;
    pub const CONTRACT_VIOLATION: i32 = 1002;
    pub const NOT_FOUND: i32 = 1004;
    pub const STORE_UNAVAILABLE: i32 = 5003;
}
