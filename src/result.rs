use axum::Json;
use serde::{Deserialize, Serialize};

/// 统一响应信封
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        resp_data: None,
    })
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const BAD_REQUEST: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const INVALID_TOKEN_FORMAT: i32 = 1006;
    pub const INVALID_TOKEN: i32 = 1007;
    pub const AUTH_REQUIRED: i32 = 1008;
    pub const ACCOUNT_INACTIVE: i32 = 1009;
    pub const EDIT_CONFLICT: i32 = 1010;
    pub const METHOD_NOT_ALLOWED: i32 = 1011;
    pub const INTERNAL_ERROR: i32 = 5000;
}
