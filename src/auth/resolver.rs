use crate::data::{DataError, Scope, TokenModel, UserModel, tokens::validate_token_plaintext};
use crate::error::AppError;

use super::principal::{AuthenticatedUser, Principal};

/// 从 `Authorization` 请求头解析出请求身份
#[derive(Clone)]
pub struct AuthenticationResolver {
    tokens: TokenModel,
    users: UserModel,
}

/// 只接受恰好两段的 `Bearer <token>`
pub fn parse_bearer(header: &str) -> Result<&str, AppError> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(AppError::InvalidCredentialFormat),
    }
}

impl AuthenticationResolver {
    pub fn new(tokens: TokenModel, users: UserModel) -> Self {
        Self { tokens, users }
    }

    pub async fn resolve(&self, header: Option<&str>) -> Result<Principal, AppError> {
        let header = match header {
            None | Some("") => return Ok(Principal::Anonymous),
            Some(header) => header,
        };

        let token = parse_bearer(header)?;
        validate_token_plaintext(token).map_err(|_| AppError::InvalidCredentialFormat)?;

        match self
            .users
            .get_for_token(&self.tokens, Scope::Authentication, token)
            .await
        {
            Ok(user) => Ok(Principal::User(AuthenticatedUser {
                id: user.id,
                activated: user.activated,
            })),
            Err(DataError::RecordNotFound) => {
                tracing::debug!("Authentication token did not match any user");
                Err(AppError::InvalidCredential)
            }
            Err(err) => Err(AppError::internal(err)),
        }
    }
}
