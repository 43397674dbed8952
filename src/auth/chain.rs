use crate::data::PermissionModel;
use crate::error::AppError;

use super::principal::{AuthenticatedUser, Principal};

/// 授权链上的一道关卡；后面的关卡会先完整执行前面的关卡
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Authenticated,
    Activated,
    Permission(&'static str),
}

pub fn require_authenticated(principal: &Principal) -> Result<&AuthenticatedUser, AppError> {
    match principal {
        Principal::Anonymous => Err(AppError::AuthenticationRequired),
        Principal::User(user) => Ok(user),
    }
}

pub fn require_activated(principal: &Principal) -> Result<&AuthenticatedUser, AppError> {
    let user = require_authenticated(principal)?;
    if !user.activated {
        return Err(AppError::AccountInactive);
    }
    Ok(user)
}

#[derive(Clone)]
pub struct AuthorizationChain {
    permissions: PermissionModel,
}

impl AuthorizationChain {
    pub fn new(permissions: PermissionModel) -> Self {
        Self { permissions }
    }

    pub async fn require_permission<'p>(
        &self,
        principal: &'p Principal,
        code: &str,
    ) -> Result<&'p AuthenticatedUser, AppError> {
        let user = require_activated(principal)?;
        let permissions = self
            .permissions
            .get_all_for_user(user.id)
            .await
            .map_err(AppError::internal)?;

        if !permissions.include(code) {
            tracing::debug!("User {} lacks permission {}", user.id, code);
            return Err(AppError::Forbidden);
        }
        Ok(user)
    }

    pub async fn check(&self, principal: &Principal, gate: Gate) -> Result<(), AppError> {
        match gate {
            Gate::Authenticated => require_authenticated(principal).map(|_| ()),
            Gate::Activated => require_activated(principal).map(|_| ()),
            Gate::Permission(code) => self.require_permission(principal, code).await.map(|_| ()),
        }
    }
}
