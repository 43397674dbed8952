use axum::{extract::State, response::IntoResponse};
use serde::Serialize;

use crate::AppState;
use crate::config::VERSION;
use crate::result::success_to_api_response;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

#[axum::debug_handler]
pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    success_to_api_response(HealthResponse {
        status: "available",
        system_info: SystemInfo {
            environment: state.config.environment.clone(),
            version: VERSION,
        },
    })
}
