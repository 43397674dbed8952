use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::query_builder::Separated;
use sqlx::{FromRow, PgPool, Postgres};

use super::filters::{Filters, Metadata, calculate_metadata};
use super::{DataError, Versioned, bounded, versioned};
use crate::validator::{Validator, unique};

pub const SORT_SAFELIST: &[&str] = &[
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// 片长（分钟），JSON 中写作 `"102 mins"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct Runtime(pub i32);

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let mut parts = raw.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(minutes), Some("mins" | "min"), None) => minutes
                .parse::<i32>()
                .map(Runtime)
                .map_err(|_| serde::de::Error::custom("invalid runtime format")),
            _ => Err(serde::de::Error::custom("invalid runtime format")),
        }
    }
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "is_default")]
    pub year: i32,
    #[serde(skip_serializing_if = "is_default")]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    pub version: i32,
}

impl Movie {
    pub fn new(title: String, year: i32, runtime: Runtime, genres: Vec<String>) -> Self {
        Self {
            id: 0,
            created_at: Utc::now(),
            title,
            year,
            runtime,
            genres,
            version: 0,
        }
    }
}

impl Versioned for Movie {
    const TABLE: &'static str = "movies";

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
        set.push("title = ").push_bind_unseparated(self.title.clone());
        set.push("year = ").push_bind_unseparated(self.year);
        set.push("runtime = ").push_bind_unseparated(self.runtime);
        set.push("genres = ").push_bind_unseparated(self.genres.clone());
    }
}

pub fn validate_movie(v: &mut Validator, movie: &Movie) {
    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check(movie.title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(movie.year != 0, "year", "must be provided");
    v.check(movie.year >= 1888, "year", "must be greater than 1888");
    v.check(movie.year <= Utc::now().year(), "year", "must not be in the future");

    v.check(movie.runtime.0 != 0, "runtime", "must be provided");
    v.check(movie.runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(!movie.genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(movie.genres.len() <= 5, "genres", "must not contain more than 5 genres");
    v.check(unique(&movie.genres), "genres", "must not contain duplicate values");
}

#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn insert(&self, movie: &mut Movie) -> Result<(), DataError>;
    async fn get(&self, id: i64) -> Result<Option<Movie>, DataError>;
    async fn update(&self, movie: &mut Movie) -> Result<(), DataError>;
    async fn delete(&self, id: i64) -> Result<(), DataError>;
    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DataError>;
}

pub struct PgMovieStore {
    pool: PgPool,
}

impl PgMovieStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct CountedMovie {
    total: i64,
    #[sqlx(flatten)]
    movie: Movie,
}

#[async_trait]
impl MovieStore for PgMovieStore {
    async fn insert(&self, movie: &mut Movie) -> Result<(), DataError> {
        let (id, created_at, version): (i64, DateTime<Utc>, i32) = sqlx::query_as(
            r#"
            INSERT INTO movies (title, year, runtime, genres)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, version
            "#,
        )
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.runtime)
        .bind(&movie.genres)
        .fetch_one(&self.pool)
        .await?;

        movie.id = id;
        movie.created_at = created_at;
        movie.version = version;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Movie>, DataError> {
        if id < 1 {
            return Ok(None);
        }

        let movie = sqlx::query_as::<_, Movie>(
            r#"
            SELECT id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movie)
    }

    async fn update(&self, movie: &mut Movie) -> Result<(), DataError> {
        versioned::update(&self.pool, movie).await
    }

    async fn delete(&self, id: i64) -> Result<(), DataError> {
        let result = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DataError::RecordNotFound);
        }
        Ok(())
    }

    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DataError> {
        // 排序字段来自白名单，可以直接拼接
        let query = format!(
            r#"
            SELECT count(*) OVER() AS total, id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE (to_tsvector('simple', title) @@ plainto_tsquery('simple', $1) OR $1 = '')
            AND (genres @> $2 OR $2 = '{{}}')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filters.sort_column(),
            filters.sort_direction()
        );

        let rows = sqlx::query_as::<_, CountedMovie>(&query)
            .bind(title)
            .bind(genres)
            .bind(filters.limit())
            .bind(filters.offset())
            .fetch_all(&self.pool)
            .await?;

        let total = rows.first().map(|row| row.total).unwrap_or(0);
        let movies = rows.into_iter().map(|row| row.movie).collect();
        Ok((movies, calculate_metadata(total, filters.page, filters.page_size)))
    }
}

#[derive(Clone)]
pub struct MovieModel {
    store: Arc<dyn MovieStore>,
    timeout: Duration,
}

impl MovieModel {
    pub fn new(store: Arc<dyn MovieStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn insert(&self, movie: &mut Movie) -> Result<(), DataError> {
        bounded(self.timeout, self.store.insert(movie)).await
    }

    pub async fn get(&self, id: i64) -> Result<Movie, DataError> {
        bounded(self.timeout, self.store.get(id))
            .await?
            .ok_or(DataError::RecordNotFound)
    }

    pub async fn update(&self, movie: &mut Movie) -> Result<(), DataError> {
        bounded(self.timeout, self.store.update(movie)).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), DataError> {
        bounded(self.timeout, self.store.delete(id)).await
    }

    pub async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> Result<(Vec<Movie>, Metadata), DataError> {
        bounded(self.timeout, self.store.get_all(title, genres, filters)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryMovieStore;

    fn model() -> MovieModel {
        MovieModel::new(Arc::new(MemoryMovieStore::default()), Duration::from_secs(3))
    }

    fn movie(title: &str, year: i32, genres: &[&str]) -> Movie {
        Movie::new(
            title.into(),
            year,
            Runtime(100),
            genres.iter().map(|g| g.to_string()).collect(),
        )
    }

    fn filters(sort: &str) -> Filters {
        Filters {
            page: 1,
            page_size: 20,
            sort: sort.into(),
            sort_safelist: SORT_SAFELIST,
        }
    }

    #[test]
    fn runtime_json_format() {
        assert_eq!(serde_json::to_string(&Runtime(102)).unwrap(), "\"102 mins\"");
        let parsed: Runtime = serde_json::from_str("\"95 mins\"").unwrap();
        assert_eq!(parsed, Runtime(95));
        assert!(serde_json::from_str::<Runtime>("\"95 minutes\"").is_err());
        assert!(serde_json::from_str::<Runtime>("95").is_err());
    }

    #[test]
    fn movie_validation() {
        let mut v = Validator::new();
        validate_movie(&mut v, &movie("", 1700, &["drama", "drama"]));
        assert_eq!(v.errors["title"], "must be provided");
        assert_eq!(v.errors["year"], "must be greater than 1888");
        assert_eq!(v.errors["genres"], "must not contain duplicate values");

        let mut ok = Validator::new();
        validate_movie(&mut ok, &movie("Moana", 2016, &["animation"]));
        assert!(ok.valid());
    }

    #[tokio::test]
    async fn crud_round() {
        let movies = model();
        let mut moana = movie("Moana", 2016, &["animation", "adventure"]);
        movies.insert(&mut moana).await.unwrap();
        assert_eq!(moana.version, 1);

        let mut fetched = movies.get(moana.id).await.unwrap();
        fetched.year = 2017;
        movies.update(&mut fetched).await.unwrap();
        assert_eq!(fetched.version, 2);
        assert_eq!(movies.get(moana.id).await.unwrap().year, 2017);

        movies.delete(moana.id).await.unwrap();
        assert!(matches!(movies.get(moana.id).await, Err(DataError::RecordNotFound)));
        assert!(matches!(movies.delete(moana.id).await, Err(DataError::RecordNotFound)));
    }

    #[tokio::test]
    async fn get_all_filters_and_sorts() {
        let movies = model();
        for (title, year, genres) in [
            ("The Breakfast Club", 1985, &["comedy", "drama"][..]),
            ("Black Panther", 2018, &["action", "adventure"][..]),
            ("Deadpool", 2016, &["action", "comedy"][..]),
        ] {
            movies.insert(&mut movie(title, year, genres)).await.unwrap();
        }

        let (all, metadata) = movies.get_all("", &[], &filters("-year")).await.unwrap();
        let years: Vec<i32> = all.iter().map(|m| m.year).collect();
        assert_eq!(years, vec![2018, 2016, 1985]);
        assert_eq!(metadata.total_records, 3);

        let (comedies, _) = movies
            .get_all("", &["comedy".to_string()], &filters("title"))
            .await
            .unwrap();
        let titles: Vec<&str> = comedies.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Deadpool", "The Breakfast Club"]);

        let (club, _) = movies.get_all("breakfast club", &[], &filters("id")).await.unwrap();
        assert_eq!(club.len(), 1);

        let (none, metadata) = movies.get_all("moana", &[], &filters("id")).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(metadata, Metadata::default());
    }
}
