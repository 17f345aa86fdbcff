// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    handlers::{auth, comment, profile},
    state::AppState,
    utils::jwt::auth_middleware,
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Assembles the main application router.
///
/// * `/api/users`: register and login are public, profile requires a token.
/// * `/api/comments`: every route requires a token.
/// * Applies global middleware (Trace, CORS) and, when configured, serves the
///   frontend bundle for unmatched paths.
pub fn create_router(state: AppState) -> Router {
    let require_auth = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let user_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .merge(
            Router::new()
                .route("/profile", get(profile::get_profile))
                .route_layer(require_auth.clone()),
        );

    let comment_routes = Router::new()
        .route(
            "/",
            get(comment::list_comments).post(comment::create_comment),
        )
        .route("/{id}", get(comment::get_comment))
        .route("/{id}/replies", get(comment::get_replies))
        .route("/{id}/parents", get(comment::get_parent_path))
        .route(
            "/{id}/upvote",
            post(comment::upvote_comment).delete(comment::remove_upvote),
        )
        .route_layer(require_auth);

    let mut router = Router::new()
        .nest("/api/users", user_routes)
        .nest("/api/comments", comment_routes);

    if let Some(dir) = &state.config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_origins)),
        )
        .with_state(state)
}
