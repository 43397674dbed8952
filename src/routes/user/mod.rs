use axum::{
    Router,
    routing::{post, put},
};

use crate::AppState;

mod handler;
mod model;

pub use handler::{ACTIVATION_TTL, activate, register, update_password};
pub use model::MessageResponse;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/activated", put(activate))
        .route("/users/password", put(update_password))
}
