use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};

use super::resolver::AuthenticationResolver;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub activated: bool,
}

/// 请求所代表的身份，每个请求解析一次，之后不再修改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(AuthenticatedUser),
}

/// 优先使用 `authenticate` 中间件放入的身份；没有时直接从请求头解析
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    AuthenticationResolver: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(*principal);
        }

        let resolver = AuthenticationResolver::from_ref(state);
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().map_err(|_| AppError::InvalidCredentialFormat))
            .transpose()?;
        let principal = resolver.resolve(header).await?;
        parts.extensions.insert(principal);
        Ok(principal)
    }
}
