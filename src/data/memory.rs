//! 内存存储实现：未配置 DATABASE_URL 时使用，也供测试使用。

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::filters::{Filters, Metadata, calculate_metadata};
use super::movies::{Movie, MovieStore};
use super::permissions::{PermissionStore, Permissions};
use super::tokens::{Scope, Token, TokenHash, TokenStore};
use super::users::{User, UserStore};
use super::versioned::MemoryTable;
use super::DataError;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 只保存哈希对应的归属信息，不保留明文
#[derive(Debug, Clone, Copy)]
struct StoredToken {
    user_id: i64,
    expiry: DateTime<Utc>,
    scope: Scope,
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<TokenHash, StoredToken>>,
}

impl MemoryTokenStore {
    pub fn len(&self) -> usize {
        lock(&self.tokens).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: &Token) -> Result<(), DataError> {
        lock(&self.tokens).insert(
            token.hash,
            StoredToken {
                user_id: token.user_id,
                expiry: token.expiry,
                scope: token.scope,
            },
        );
        Ok(())
    }

    async fn owner_for(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DataError> {
        Ok(lock(&self.tokens)
            .get(hash)
            .filter(|token| token.scope == scope && token.expiry > now)
            .map(|token| token.user_id))
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<(), DataError> {
        lock(&self.tokens).retain(|_, token| !(token.scope == scope && token.user_id == user_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPermissionStore {
    grants: Mutex<HashMap<i64, HashSet<String>>>,
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, DataError> {
        Ok(lock(&self.grants)
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), DataError> {
        lock(&self.grants)
            .entry(user_id)
            .or_default()
            .extend(codes.iter().map(|code| code.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    table: MemoryTable<User>,
}

fn email_taken(user: &User, rows: &HashMap<i64, User>) -> Result<(), DataError> {
    // email 列是 citext，比较时忽略大小写
    let taken = rows
        .values()
        .any(|row| row.id != user.id && row.email.eq_ignore_ascii_case(&user.email));
    if taken {
        return Err(DataError::DuplicateEmail);
    }
    Ok(())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &mut User) -> Result<(), DataError> {
        user.created_at = Utc::now();
        self.table.insert_checked(user, email_taken)
    }

    async fn get(&self, id: i64) -> Result<Option<User>, DataError> {
        Ok(self.table.get(id))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        Ok(self.table.find(|user| user.email.eq_ignore_ascii_case(email)))
    }

    async fn update(&self, user: &mut User) -> Result<(), DataError> {
        self.table.update_checked(user, email_taken)
    }
}

#[derive(Default)]
pub struct MemoryMovieStore {
    table: MemoryTable<Movie>,
}

fn title_matches(title: &str, query: &str) -> bool {
    let words: HashSet<String> = title.split_whitespace().map(str::to_lowercase).collect();
    query
        .split_whitespace()
        .all(|word| words.contains(&word.to_lowercase()))
}

fn compare_by(column: &str, a: &Movie, b: &Movie) -> Ordering {
    match column {
        "title" => a.title.cmp(&b.title),
        "year" => a.year.cmp(&b.year),
        "runtime" => a.runtime.cmp(&b.runtime),
        _ => a.id.cmp(&b.id),
    }
}

#[async_trait]
impl MovieStore for MemoryMovieStore {
    async fn insert(&self, movie: &mut Movie) -> Result<(), DataError> {
        movie.created_at = Utc::now();
        self.table.insert(movie);
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Movie>, DataError> {
        Ok(self.table.get(id))
    }

    async fn update(&self, movie: &mut Movie) -> Result<(), DataError> {
        self.table.update(movie)
    }

    async fn delete(&self, id: i64) -> Result<(), DataError> {
        self.table.delete(id)
    }

    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DataError> {
        let mut movies: Vec<Movie> = self
            .table
            .all()
            .into_iter()
            .filter(|movie| title_matches(&movie.title, title))
            .filter(|movie| genres.iter().all(|genre| movie.genres.contains(genre)))
            .collect();

        let column = filters.sort_column();
        movies.sort_by(|a, b| {
            let ordering = compare_by(column, a, b);
            let ordering = if filters.sort_descending() {
                ordering.reverse()
            } else {
                ordering
            };
            ordering.then(a.id.cmp(&b.id))
        });

        let total = movies.len() as i64;
        let page: Vec<Movie> = movies
            .into_iter()
            .skip(filters.offset().max(0) as usize)
            .take(filters.limit().max(0) as usize)
            .collect();

        if page.is_empty() {
            return Ok((page, Metadata::default()));
        }
        Ok((page, calculate_metadata(total, filters.page, filters.page_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokens::{TokenModel, hash_plaintext};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn token_store_keeps_only_the_hash() {
        let store = Arc::new(MemoryTokenStore::default());
        let model = TokenModel::new(store.clone(), Duration::from_secs(3));
        let token = model
            .new_token(9, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();

        let tokens = lock(&store.tokens);
        assert_eq!(tokens.len(), 1);
        let stored = tokens.get(&hash_plaintext(&token.plaintext)).unwrap();
        assert_eq!(stored.user_id, 9);
        assert_eq!(stored.scope, Scope::Authentication);
        assert!(!format!("{:?}", *tokens).contains(&token.plaintext));
    }

    fn user(name: &str, email: &str) -> User {
        User::new(name.into(), email.into())
    }

    #[tokio::test]
    async fn update_rejects_an_email_owned_by_another_user() {
        let store = MemoryUserStore::default();
        let mut alice = user("Alice", "alice@example.com");
        let mut bob = user("Bob", "bob@example.com");
        store.insert(&mut alice).await.unwrap();
        store.insert(&mut bob).await.unwrap();

        bob.email = "ALICE@example.com".into();
        let result = store.update(&mut bob).await;
        assert!(matches!(result, Err(DataError::DuplicateEmail)));
        assert_eq!(bob.version, 1);
        assert_eq!(store.get(bob.id).await.unwrap().unwrap().email, "bob@example.com");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_cannot_both_claim_one_email() {
        for _ in 0..50 {
            let store = Arc::new(MemoryUserStore::default());
            let mut first = user("First", "first@example.com");
            let mut second = user("Second", "second@example.com");
            store.insert(&mut first).await.unwrap();
            store.insert(&mut second).await.unwrap();

            let handles: Vec<_> = [first, second]
                .into_iter()
                .map(|mut row| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        row.email = "shared@example.com".into();
                        store.update(&mut row).await
                    })
                })
                .collect();

            let mut succeeded = 0;
            for handle in handles {
                if handle.await.unwrap().is_ok() {
                    succeeded += 1;
                }
            }
            assert_eq!(succeeded, 1);
        }
    }
}
