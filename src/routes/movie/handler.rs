use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::AppState;
use crate::data::filters::validate_filters;
use crate::data::movies::{SORT_SAFELIST, validate_movie};
use crate::data::{Filters, Movie};
use crate::error::AppError;
use crate::result::success_to_api_response;
use crate::routes::user::MessageResponse;
use crate::routes::{JsonBody, parse_id};
use crate::validator::Validator;

use super::model::{CreateMovieRequest, MovieListResponse, MovieResponse, UpdateMovieRequest};

pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

fn read_string(params: &HashMap<String, String>, key: &str, default: &str) -> String {
    params
        .get(key)
        .filter(|s| !s.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn read_csv(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .get(key)
        .filter(|s| !s.is_empty())
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

fn read_int(params: &HashMap<String, String>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match params.get(key).filter(|s| !s.is_empty()) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

#[axum::debug_handler]
pub async fn list_movies(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let mut v = Validator::new();

    let title = read_string(&params, "title", "");
    let genres = read_csv(&params, "genres");
    let filters = Filters {
        page: read_int(&params, "page", 1, &mut v),
        page_size: read_int(&params, "page_size", 20, &mut v),
        sort: read_string(&params, "sort", "id"),
        sort_safelist: SORT_SAFELIST,
    };

    validate_filters(&mut v, &filters);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    let (movies, metadata) = state.models.movies.get_all(&title, &genres, &filters).await?;
    Ok(success_to_api_response(MovieListResponse { movies, metadata }))
}

#[axum::debug_handler]
pub async fn show_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let movie = state.models.movies.get(id).await?;
    Ok(success_to_api_response(MovieResponse { movie }))
}

#[axum::debug_handler]
pub async fn create_movie(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateMovieRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut movie = Movie::new(req.title, req.year, req.runtime, req.genres);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    state.models.movies.insert(&mut movie).await?;

    let location = format!("/v1/movies/{}", movie.id);
    Ok((
        StatusCode::CREATED,
        [(axum::http::header::LOCATION, location)],
        success_to_api_response(MovieResponse { movie }),
    ))
}

/// 带 X-Expected-Version 时先比对版本号，真正的并发检查在写入时完成
#[axum::debug_handler]
pub async fn update_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<UpdateMovieRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let mut movie = state.models.movies.get(id).await?;

    if let Some(expected) = headers.get(EXPECTED_VERSION_HEADER) {
        let expected = expected.to_str().unwrap_or_default().trim();
        if expected != movie.version.to_string() {
            return Err(AppError::EditConflict);
        }
    }

    req.apply(&mut movie);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    if !v.valid() {
        return Err(AppError::FailedValidation(v.errors));
    }

    state.models.movies.update(&mut movie).await?;
    Ok(success_to_api_response(MovieResponse { movie }))
}

#[axum::debug_handler]
pub async fn delete_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    state.models.movies.delete(id).await?;
    Ok(success_to_api_response(MessageResponse {
        message: "movie successfully deleted",
    }))
}
