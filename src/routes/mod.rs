use axum::{
    Router,
    extract::FromRequest,
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::AppState;
use crate::auth::Gate;
use crate::data::permissions::{MOVIES_READ, MOVIES_WRITE};
use crate::error::AppError;
use crate::middleware::{
    Guard, authenticate, debug_vars, handle_panic, log_errors, rate_limit, track_metrics,
};

pub mod healthcheck;
pub mod movie;
pub mod token;
pub mod user;

/// JSON 请求体；解析失败时返回统一的错误信封
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// 解析路径中的 id，非正整数一律视为不存在
pub fn parse_id(raw: &str) -> Result<i64, AppError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::NotFound),
    }
}

fn cors(trusted_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = trusted_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn not_found() -> AppError {
    AppError::NotFound
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// 外层到内层：请求计数、panic 恢复、CORS、请求日志、限流、身份解析
pub fn app(state: AppState) -> Router {
    let guard = |gate| Guard::new(state.resolver.clone(), state.chain.clone(), gate);

    let api = Router::new()
        .route("/healthcheck", get(healthcheck::healthcheck))
        .merge(user::routes())
        .merge(token::routes())
        .merge(movie::routes(
            guard(Gate::Permission(MOVIES_READ)),
            guard(Gate::Permission(MOVIES_WRITE)),
        ));

    Router::new()
        .nest("/v1", api)
        .route("/debug/vars", get(debug_vars))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.metrics.clone(), track_metrics))
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(cors(&state.config.cors_trusted_origins))
                .layer(from_fn(log_errors))
                .layer(from_fn_with_state(state.limiter.clone(), rate_limit))
                .layer(from_fn_with_state(state.resolver.clone(), authenticate)),
        )
        .with_state(state)
}
