use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use super::{DataError, bounded};

/// 明文令牌长度：16 字节随机数的无填充 base32 编码
pub const TOKEN_PLAINTEXT_LEN: usize = 26;

pub type TokenHash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Activation,
    Authentication,
    PasswordReset,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
            Scope::PasswordReset => "password-reset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: TokenHash,
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: Scope,
}

// 明文不进日志
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

pub fn hash_plaintext(plaintext: &str) -> TokenHash {
    Sha256::digest(plaintext.as_bytes()).into()
}

pub fn generate_token(user_id: i64, ttl: Duration, scope: Scope) -> Result<Token, DataError> {
    let mut random_bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut random_bytes)?;

    let plaintext = BASE32_NOPAD.encode(&random_bytes);
    let hash = hash_plaintext(&plaintext);
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let expiry = Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    Ok(Token {
        plaintext,
        hash,
        user_id,
        expiry,
        scope,
    })
}

/// 校验明文令牌的形状，返回错误描述
pub fn validate_token_plaintext(plaintext: &str) -> Result<(), &'static str> {
    if plaintext.is_empty() {
        return Err("must be provided");
    }
    if plaintext.len() != TOKEN_PLAINTEXT_LEN {
        return Err("must be 26 bytes long");
    }
    Ok(())
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<(), DataError>;

    /// 按哈希、作用域和未过期条件查找令牌所属用户
    async fn owner_for(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DataError>;

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), DataError>;
}

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &Token) -> Result<(), DataError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (hash, user_id, expiry, scope)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.hash[..])
        .bind(token.user_id)
        .bind(token.expiry)
        .bind(token.scope.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn owner_for(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DataError> {
        let owner: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM tokens
            WHERE hash = $1 AND scope = $2 AND expiry > $3
            "#,
        )
        .bind(&hash[..])
        .bind(scope.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), DataError> {
        sqlx::query("DELETE FROM tokens WHERE scope = $1 AND user_id = $2")
            .bind(scope.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// 令牌的生成、校验与批量失效
#[derive(Clone)]
pub struct TokenModel {
    store: Arc<dyn TokenStore>,
    timeout: Duration,
}

impl TokenModel {
    pub fn new(store: Arc<dyn TokenStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// 生成并持久化新令牌；返回值携带明文，仅交给调用方
    pub async fn new_token(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: Scope,
    ) -> Result<Token, DataError> {
        let token = generate_token(user_id, ttl, scope)?;
        bounded(self.timeout, self.store.insert(&token)).await?;
        tracing::debug!("Issued {} token for user {}", scope, user_id);
        Ok(token)
    }

    /// 过期、作用域不符与不存在一律返回 RecordNotFound
    pub async fn verify_and_resolve(&self, scope: Scope, plaintext: &str) -> Result<i64, DataError> {
        let hash = hash_plaintext(plaintext);
        bounded(self.timeout, self.store.owner_for(&hash, scope, Utc::now()))
            .await?
            .ok_or(DataError::RecordNotFound)
    }

    pub async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), DataError> {
        bounded(self.timeout, self.store.delete_all_for_user(scope, user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryTokenStore;
    use std::collections::HashSet;

    fn model() -> (TokenModel, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::default());
        (TokenModel::new(store.clone(), Duration::from_secs(3)), store)
    }

    #[test]
    fn plaintext_is_26_base32_characters() {
        let token = generate_token(7, Duration::from_secs(60), Scope::Activation).unwrap();
        assert_eq!(token.plaintext.len(), TOKEN_PLAINTEXT_LEN);
        assert!(
            token
                .plaintext
                .chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
        );
        assert_eq!(token.hash, hash_plaintext(&token.plaintext));
        assert!(validate_token_plaintext(&token.plaintext).is_ok());
    }

    #[test]
    fn generated_plaintexts_and_hashes_do_not_collide() {
        let mut plaintexts = HashSet::new();
        let mut hashes = HashSet::new();
        for _ in 0..10_000 {
            let token = generate_token(1, Duration::from_secs(60), Scope::Authentication).unwrap();
            assert!(hashes.insert(token.hash));
            assert!(plaintexts.insert(token.plaintext));
        }
    }

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(
            hash_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
            hash_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXYZ")
        );
        assert_ne!(
            hash_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
            hash_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXY2")
        );
    }

    #[test]
    fn plaintext_shape_validation() {
        assert_eq!(validate_token_plaintext(""), Err("must be provided"));
        assert_eq!(validate_token_plaintext("short"), Err("must be 26 bytes long"));
        assert!(validate_token_plaintext("ABCDEFGHIJKLMNOPQRSTUVWXYZ").is_ok());
    }

    #[test]
    fn serialized_token_exposes_only_plaintext_and_expiry() {
        let token = generate_token(3, Duration::from_secs(60), Scope::Authentication).unwrap();
        let json = serde_json::to_value(&token).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["token"], token.plaintext.as_str());
        assert!(object.contains_key("expiry"));
    }

    #[tokio::test]
    async fn new_token_resolves_to_owner_in_matching_scope() {
        let (tokens, _) = model();
        let token = tokens
            .new_token(42, Duration::from_secs(3600), Scope::Authentication)
            .await
            .unwrap();

        let owner = tokens
            .verify_and_resolve(Scope::Authentication, &token.plaintext)
            .await
            .unwrap();
        assert_eq!(owner, 42);

        let wrong_scope = tokens
            .verify_and_resolve(Scope::Activation, &token.plaintext)
            .await;
        assert!(matches!(wrong_scope, Err(DataError::RecordNotFound)));
    }

    #[tokio::test]
    async fn expired_token_is_indistinguishable_from_unknown() {
        let (tokens, _) = model();
        let token = tokens
            .new_token(5, Duration::ZERO, Scope::Authentication)
            .await
            .unwrap();

        let expired = tokens
            .verify_and_resolve(Scope::Authentication, &token.plaintext)
            .await;
        let unknown = tokens
            .verify_and_resolve(Scope::Authentication, "AAAAAAAAAAAAAAAAAAAAAAAAAA")
            .await;
        assert!(matches!(expired, Err(DataError::RecordNotFound)));
        assert!(matches!(unknown, Err(DataError::RecordNotFound)));
    }

    #[tokio::test]
    async fn delete_all_for_user_only_touches_that_scope_and_owner() {
        let (tokens, store) = model();
        let hour = Duration::from_secs(3600);
        let activation = tokens.new_token(1, hour, Scope::Activation).await.unwrap();
        let second = tokens.new_token(1, hour, Scope::Activation).await.unwrap();
        let auth = tokens.new_token(1, hour, Scope::Authentication).await.unwrap();
        let other = tokens.new_token(2, hour, Scope::Activation).await.unwrap();

        tokens.delete_all_for_user(Scope::Activation, 1).await.unwrap();

        for gone in [&activation, &second] {
            assert!(matches!(
                tokens.verify_and_resolve(Scope::Activation, &gone.plaintext).await,
                Err(DataError::RecordNotFound)
            ));
        }
        assert_eq!(
            tokens
                .verify_and_resolve(Scope::Authentication, &auth.plaintext)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            tokens
                .verify_and_resolve(Scope::Activation, &other.plaintext)
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn scope_serializes_in_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Scope::PasswordReset).unwrap(),
            "\"password-reset\""
        );
        assert_eq!(Scope::Activation.to_string(), "activation");
    }
}
