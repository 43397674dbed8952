use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, PgPool, Postgres};

use super::tokens::{Scope, TokenModel};
use super::{DataError, Versioned, bounded, versioned};
use crate::utils::{hash_password, verify_password};
use crate::validator::{Validator, validate_email, validate_password_plaintext};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub activated: bool,
    #[serde(skip_serializing)]
    pub version: i32,
}

impl User {
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            name,
            email,
            password_hash: String::new(),
            activated: false,
            version: 0,
        }
    }

    pub fn set_password(&mut self, plaintext: &str, cost: u32) -> Result<(), DataError> {
        self.password_hash = hash_password(plaintext, cost)?;
        Ok(())
    }

    pub fn password_matches(&self, plaintext: &str) -> Result<bool, DataError> {
        if self.password_hash.is_empty() {
            return Ok(false);
        }
        Ok(verify_password(plaintext, &self.password_hash)?)
    }
}

impl Versioned for User {
    const TABLE: &'static str = "users";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    fn push_assignments(&self, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        set.push("name = ").push_bind_unseparated(self.name.clone());
        set.push("email = ").push_bind_unseparated(self.email.clone());
        set.push("password_hash = ")
            .push_bind_unseparated(self.password_hash.clone());
        set.push("activated = ").push_bind_unseparated(self.activated);
    }
}

pub fn validate_user(v: &mut Validator, user: &User, password: Option<&str>) {
    v.check(!user.name.is_empty(), "name", "must be provided");
    v.check(user.name.len() <= 500, "name", "must not be more than 500 bytes long");
    validate_email(v, &user.email);
    if let Some(password) = password {
        validate_password_plaintext(v, password);
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// 写入新用户，回填 id、创建时间与版本号
    async fn insert(&self, user: &mut User) -> Result<(), DataError>;
    async fn get(&self, id: i64) -> Result<Option<User>, DataError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DataError>;
    async fn update(&self, user: &mut User) -> Result<(), DataError>;
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(err: sqlx::Error) -> DataError {
    match err.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => DataError::DuplicateEmail,
        _ => DataError::Database(err),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &mut User) -> Result<(), DataError> {
        let (id, created_at, version): (i64, DateTime<Utc>, i32) = sqlx::query_as(
            r#"
            INSERT INTO users (name, email, password_hash, activated)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, version
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.activated)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        user.id = id;
        user.created_at = created_at;
        user.version = version;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<User>, DataError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, created_at, name, email::text AS email, password_hash, activated, version
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, created_at, name, email::text AS email, password_hash, activated, version
            FROM users
            WHERE email = $1::citext
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update(&self, user: &mut User) -> Result<(), DataError> {
        match versioned::update(&self.pool, user).await {
            Err(DataError::Database(err)) => Err(map_unique_violation(err)),
            other => other,
        }
    }
}

#[derive(Clone)]
pub struct UserModel {
    store: Arc<dyn UserStore>,
    timeout: Duration,
}

impl UserModel {
    pub fn new(store: Arc<dyn UserStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn insert(&self, user: &mut User) -> Result<(), DataError> {
        bounded(self.timeout, self.store.insert(user)).await
    }

    pub async fn get(&self, id: i64) -> Result<User, DataError> {
        bounded(self.timeout, self.store.get(id))
            .await?
            .ok_or(DataError::RecordNotFound)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User, DataError> {
        bounded(self.timeout, self.store.get_by_email(email))
            .await?
            .ok_or(DataError::RecordNotFound)
    }

    /// 版本号不匹配或记录已删除时返回 EditConflict
    pub async fn update(&self, user: &mut User) -> Result<(), DataError> {
        bounded(self.timeout, self.store.update(user)).await
    }

    /// 通过明文令牌找到对应用户；令牌无效与用户不存在都返回 RecordNotFound
    pub async fn get_for_token(
        &self,
        tokens: &TokenModel,
        scope: Scope,
        plaintext: &str,
    ) -> Result<User, DataError> {
        let user_id = tokens.verify_and_resolve(scope, plaintext).await?;
        self.get(user_id).await
    }
}
