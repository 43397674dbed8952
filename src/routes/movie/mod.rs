use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};

use crate::AppState;
use crate::middleware::{Guard, require};

mod handler;
mod model;

pub use handler::{
    EXPECTED_VERSION_HEADER, create_movie, delete_movie, list_movies, show_movie, update_movie,
};

/// 读和写分别挂不同的权限关卡
pub fn routes(read: Guard, write: Guard) -> Router<AppState> {
    let reads = Router::new()
        .route("/movies", get(list_movies))
        .route("/movies/{id}", get(show_movie))
        .route_layer(from_fn_with_state(read, require));

    let writes = Router::new()
        .route("/movies", post(create_movie))
        .route("/movies/{id}", patch(update_movie).delete(delete_movie))
        .route_layer(from_fn_with_state(write, require));

    reads.merge(writes)
}
