use axum::{
    body::Body,
    extract::{FromRef, State},
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::{AuthenticationResolver, AuthorizationChain, Gate, Principal};
use crate::error::AppError;

/// 同一路径的响应随 Authorization 请求头变化，需要告知缓存
fn vary_by_authorization(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

/// 为每个请求解析身份并放入 extensions；拒绝的响应同样带 Vary 头
pub async fn authenticate(
    State(resolver): State<AuthenticationResolver>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let header = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(value) => match value.to_str() {
            Ok(value) => Some(value),
            Err(_) => {
                return vary_by_authorization(AppError::InvalidCredentialFormat.into_response());
            }
        },
    };

    let principal = match resolver.resolve(header).await {
        Ok(principal) => principal,
        Err(err) => return vary_by_authorization(err.into_response()),
    };

    req.extensions_mut().insert(principal);
    vary_by_authorization(next.run(req).await)
}

/// 路由级授权：每个受保护的路由组挂一个 Guard
#[derive(Clone)]
pub struct Guard {
    resolver: AuthenticationResolver,
    chain: AuthorizationChain,
    gate: Gate,
}

impl Guard {
    pub fn new(resolver: AuthenticationResolver, chain: AuthorizationChain, gate: Gate) -> Self {
        Self {
            resolver,
            chain,
            gate,
        }
    }
}

impl FromRef<Guard> for AuthenticationResolver {
    fn from_ref(guard: &Guard) -> Self {
        guard.resolver.clone()
    }
}

pub async fn require(
    State(guard): State<Guard>,
    principal: Principal,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    guard.chain.check(&principal, guard.gate).await?;
    Ok(next.run(req).await)
}
