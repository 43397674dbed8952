use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::AppState;
use crate::data::permissions::MOVIES_READ;
use crate::data::users::validate_user;
use crate::data::{DataError, Scope, User};
use crate::error::AppError;
use crate::mailer::Template;
use crate::result::success_to_api_response;
use crate::routes::JsonBody;
use crate::validator::{Validator, validate_password_plaintext, validate_token_plaintext};

use super::model::{
    ActivateUserRequest, MessageResponse, RegisterUserRequest, UpdatePasswordRequest,
    UserResponse,
};

pub const ACTIVATION_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut user = User::new(req.name, req.email);

    let mut v = Validator::new();
    validate_user(&mut v, &user, Some(&req.password));
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    user.set_password(&req.password, state.config.bcrypt_cost)?;
    state.models.users.insert(&mut user).await?;
    state
        .models
        .permissions
        .add_for_user(user.id, &[MOVIES_READ])
        .await?;

    let token = state
        .models
        .tokens
        .new_token(user.id, ACTIVATION_TTL, Scope::Activation)
        .await?;

    let mailer = state.mailer.clone();
    let recipient = user.email.clone();
    let user_id = user.id;
    state.background.spawn("welcome_email", async move {
        mailer
            .send(
                &recipient,
                Template::UserWelcome,
                json!({ "activationToken": token.plaintext, "userID": user_id }),
            )
            .await
    });

    tracing::info!("User {} registered", user.id);
    Ok((
        StatusCode::CREATED,
        success_to_api_response(UserResponse { user }),
    ))
}

#[axum::debug_handler]
pub async fn activate(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ActivateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &req.token);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    let mut user = match state
        .models
        .users
        .get_for_token(&state.models.tokens, Scope::Activation, &req.token)
        .await
    {
        Ok(user) => user,
        Err(DataError::RecordNotFound) => {
            return Err(AppError::validation(
                "token",
                "invalid or expired activation token",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    user.activated = true;
    state.models.users.update(&mut user).await?;
    state
        .models
        .tokens
        .delete_all_for_user(Scope::Activation, user.id)
        .await?;

    Ok(success_to_api_response(UserResponse { user }))
}

/// 修改密码属于凭据变更，同时作废该用户的重置令牌与登录令牌
#[axum::debug_handler]
pub async fn update_password(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();
    validate_password_plaintext(&mut v, &req.password);
    validate_token_plaintext(&mut v, &req.token);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    let mut user = match state
        .models
        .users
        .get_for_token(&state.models.tokens, Scope::PasswordReset, &req.token)
        .await
    {
        Ok(user) => user,
        Err(DataError::RecordNotFound) => {
            return Err(AppError::validation(
                "token",
                "invalid or expired password reset token",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    user.set_password(&req.password, state.config.bcrypt_cost)?;
    state.models.users.update(&mut user).await?;

    for scope in [Scope::PasswordReset, Scope::Authentication] {
        state
            .models
            .tokens
            .delete_all_for_user(scope, user.id)
            .await?;
    }

    Ok(success_to_api_response(MessageResponse {
        message: "your password was successfully reset",
    }))
}
