// 数据层：存储接口、PostgreSQL 实现与内存实现

pub mod filters;
pub mod memory;
pub mod movies;
pub mod permissions;
pub mod tokens;
pub mod users;
pub mod versioned;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

pub use filters::{Filters, Metadata};
pub use movies::{Movie, MovieModel, MovieStore};
pub use permissions::{PermissionModel, PermissionStore, Permissions};
pub use tokens::{Scope, Token, TokenModel, TokenStore};
pub use users::{User, UserModel, UserStore};
pub use versioned::Versioned;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("record not found")]
    RecordNotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("secure random source failed: {0}")]
    Random(#[from] rand::Error),
    #[error("password hashing failed: {0}")]
    Password(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// 为存储调用加上超时，超时只取消当前调用
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, DataError>
where
    F: Future<Output = Result<T, DataError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(DataError::Timeout(timeout)),
    }
}

#[derive(Clone)]
pub struct Models {
    pub users: UserModel,
    pub tokens: TokenModel,
    pub permissions: PermissionModel,
    pub movies: MovieModel,
}

impl Models {
    pub fn postgres(pool: PgPool, timeout: Duration) -> Self {
        Self {
            users: UserModel::new(Arc::new(users::PgUserStore::new(pool.clone())), timeout),
            tokens: TokenModel::new(Arc::new(tokens::PgTokenStore::new(pool.clone())), timeout),
            permissions: PermissionModel::new(
                Arc::new(permissions::PgPermissionStore::new(pool.clone())),
                timeout,
            ),
            movies: MovieModel::new(Arc::new(movies::PgMovieStore::new(pool)), timeout),
        }
    }

    pub fn in_memory(timeout: Duration) -> Self {
        Self {
            users: UserModel::new(Arc::new(memory::MemoryUserStore::default()), timeout),
            tokens: TokenModel::new(Arc::new(memory::MemoryTokenStore::default()), timeout),
            permissions: PermissionModel::new(
                Arc::new(memory::MemoryPermissionStore::default()),
                timeout,
            ),
            movies: MovieModel::new(Arc::new(memory::MemoryMovieStore::default()), timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_call_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, DataError>(1)
        };
        let result = bounded(Duration::from_secs(3), slow).await;
        assert!(matches!(result, Err(DataError::Timeout(d)) if d == Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn bounded_call_passes_result_through() {
        let result = bounded(Duration::from_secs(3), async { Err::<(), _>(DataError::EditConflict) }).await;
        assert!(matches!(result, Err(DataError::EditConflict)));
    }
}
