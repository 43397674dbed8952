use std::collections::BTreeMap;

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::data::DataError;
use crate::result::{ApiResponse, error_codes};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 请求处理的拒绝结果；与传输层无关的结果在 `into_response` 中映射为 HTTP 状态码
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("invalid or missing authentication token")]
    InvalidCredentialFormat,
    #[error("invalid or missing authentication token")]
    InvalidCredential,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    AccountInactive,
    #[error("your user account doesn't have the necessary permission to access this resource")]
    Forbidden,
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("the server encountered a problem and could not process your request")]
    Internal(#[source] BoxError),
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("the method is not supported for this resource")]
    MethodNotAllowed,
    #[error("{0}")]
    BadRequest(String),
    #[error("request failed validation")]
    FailedValidation(BTreeMap<String, String>),
    #[error("invalid authentication credentials")]
    InvalidCredentials,
}

impl AppError {
    pub fn internal<E: Into<BoxError>>(err: E) -> Self {
        AppError::Internal(err.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidCredentialFormat
            | AppError::InvalidCredential
            | AppError::AuthenticationRequired
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::AccountInactive | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::RateLimited => error_codes::RATE_LIMIT,
            AppError::InvalidCredentialFormat => error_codes::INVALID_TOKEN_FORMAT,
            AppError::InvalidCredential => error_codes::INVALID_TOKEN,
            AppError::AuthenticationRequired => error_codes::AUTH_REQUIRED,
            AppError::AccountInactive => error_codes::ACCOUNT_INACTIVE,
            AppError::Forbidden => error_codes::PERMISSION_DENIED,
            AppError::EditConflict => error_codes::EDIT_CONFLICT,
            AppError::Internal(_) => error_codes::INTERNAL_ERROR,
            AppError::NotFound => error_codes::NOT_FOUND,
            AppError::MethodNotAllowed => error_codes::METHOD_NOT_ALLOWED,
            AppError::BadRequest(_) => error_codes::BAD_REQUEST,
            AppError::FailedValidation(_) => error_codes::VALIDATION_ERROR,
            AppError::InvalidCredentials => error_codes::AUTH_FAILED,
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        AppError::FailedValidation(BTreeMap::from([(field.to_string(), message.to_string())]))
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::RecordNotFound => AppError::NotFound,
            DataError::EditConflict => AppError::EditConflict,
            DataError::DuplicateEmail => {
                AppError::validation("email", "a user with this email address already exists")
            }
            other => AppError::internal(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AppError::Internal(source) = &self {
            tracing::error!(error = %source, "Request failed with internal error");
        }

        let body = match &self {
            AppError::FailedValidation(errors) => axum::Json(ApiResponse {
                code: self.code(),
                msg: self.to_string(),
                resp_data: Some(errors.clone()),
            }),
            _ => axum::Json(ApiResponse {
                code: self.code(),
                msg: self.to_string(),
                resp_data: None,
            }),
        };

        let mut response = (status, body).into_response();
        if matches!(
            self,
            AppError::InvalidCredentialFormat | AppError::InvalidCredential
        ) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn outcomes_map_to_distinct_statuses() {
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::AuthenticationRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccountInactive.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::EditConflict.status(), StatusCode::CONFLICT);
        assert_ne!(AppError::AccountInactive.code(), AppError::Forbidden.code());
    }

    #[tokio::test]
    async fn invalid_token_carries_www_authenticate() {
        let response = AppError::InvalidCredential.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let body = body_json(response).await;
        assert_eq!(body["code"], error_codes::INVALID_TOKEN);
        assert_eq!(body["msg"], "invalid or missing authentication token");
    }

    #[tokio::test]
    async fn validation_errors_are_returned_as_data() {
        let response = AppError::from(DataError::DuplicateEmail).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(
            body["resp_data"]["email"],
            "a user with this email address already exists"
        );
    }

    #[test]
    fn storage_failures_become_internal() {
        let err = AppError::from(DataError::Timeout(std::time::Duration::from_secs(3)));
        assert!(matches!(err, AppError::Internal(_)));
        assert!(matches!(AppError::from(DataError::EditConflict), AppError::EditConflict));
    }
}
