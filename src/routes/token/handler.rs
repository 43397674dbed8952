use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::AppState;
use crate::data::{DataError, Scope, User};
use crate::error::AppError;
use crate::mailer::Template;
use crate::result::success_to_api_response;
use crate::routes::JsonBody;
use crate::routes::user::{ACTIVATION_TTL, MessageResponse};
use crate::validator::{Validator, validate_email, validate_password_plaintext};

use super::model::{AuthenticationTokenResponse, CreateAuthenticationTokenRequest, EmailRequest};

pub const AUTHENTICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const PASSWORD_RESET_TTL: Duration = Duration::from_secs(45 * 60);

#[axum::debug_handler]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateAuthenticationTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_email(&mut v, &req.email);
    validate_password_plaintext(&mut v, &req.password);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    let user = match state.models.users.get_by_email(&req.email).await {
        Ok(user) => user,
        Err(DataError::RecordNotFound) => return Err(AppError::InvalidCredentials),
        Err(err) => return Err(err.into()),
    };

    if !user.password_matches(&req.password)? {
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .models
        .tokens
        .new_token(user.id, AUTHENTICATION_TTL, Scope::Authentication)
        .await?;

    Ok((
        StatusCode::CREATED,
        success_to_api_response(AuthenticationTokenResponse {
            authentication_token: token,
        }),
    ))
}

/// 按邮箱查找用户；找不到时作为字段校验错误返回
async fn user_for_email(state: &AppState, email: &str) -> Result<User, AppError> {
    let mut v = Validator::new();
    validate_email(&mut v, email);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    match state.models.users.get_by_email(email).await {
        Ok(user) => Ok(user),
        Err(DataError::RecordNotFound) => Err(AppError::validation(
            "email",
            "no matching email address found",
        )),
        Err(err) => Err(err.into()),
    }
}

#[axum::debug_handler]
pub async fn create_password_reset_token(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = user_for_email(&state, &req.email).await?;
    if !user.activated {
        return Err(AppError::validation(
            "email",
            "user account must be activated",
        ));
    }

    let token = state
        .models
        .tokens
        .new_token(user.id, PASSWORD_RESET_TTL, Scope::PasswordReset)
        .await?;

    let mailer = state.mailer.clone();
    state.background.spawn("password_reset_email", async move {
        mailer
            .send(
                &user.email,
                Template::TokenPasswordReset,
                json!({ "passwordResetToken": token.plaintext }),
            )
            .await
    });

    Ok((
        StatusCode::ACCEPTED,
        success_to_api_response(MessageResponse {
            message: "an email will be sent to you containing password reset instructions",
        }),
    ))
}

#[axum::debug_handler]
pub async fn create_activation_token(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = user_for_email(&state, &req.email).await?;
    if user.activated {
        return Err(AppError::validation(
            "email",
            "user has already been activated",
        ));
    }

    let token = state
        .models
        .tokens
        .new_token(user.id, ACTIVATION_TTL, Scope::Activation)
        .await?;

    let mailer = state.mailer.clone();
    state.background.spawn("activation_email", async move {
        mailer
            .send(
                &user.email,
                Template::TokenActivation,
                json!({ "activationToken": token.plaintext }),
            )
            .await
    });

    Ok((
        StatusCode::ACCEPTED,
        success_to_api_response(MessageResponse {
            message: "an email will be sent to you containing activation instructions",
        }),
    ))
}
