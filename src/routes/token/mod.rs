use axum::{Router, routing::post};

use crate::AppState;

mod handler;
mod model;

pub use handler::{
    AUTHENTICATION_TTL, PASSWORD_RESET_TTL, create_activation_token,
    create_authentication_token, create_password_reset_token,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tokens/authentication", post(create_authentication_token))
        .route("/tokens/password-reset", post(create_password_reset_token))
        .route("/tokens/activation", post(create_activation_token))
}
