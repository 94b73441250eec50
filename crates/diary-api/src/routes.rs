//! API route definitions

use crate::auth::auth_middleware;
use crate::handlers::{auth, entries, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Auth, user and entry routes
///
/// Auth endpoints sit under the configured prefix (`/auth` by default, or
/// bare paths when the prefix is empty).
pub fn api_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let prefix = state.config.server.auth_prefix();

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route(&format!("{prefix}/login"), post(auth::login_handler))
        .route(
            &format!("{prefix}/token/refresh"),
            post(auth::refresh_handler),
        )
        .route("/users", post(users::create_user).get(users::list_users))
        .route("/users/:id", get(users::get_user));

    // Protected routes (live access session required)
    let protected_routes = Router::new()
        .route(&format!("{prefix}/logout"), post(auth::logout_handler))
        .route(
            "/users/:id",
            put(users::update_user).delete(users::delete_user),
        )
        .route(
            "/entries",
            post(entries::create_entry).get(entries::list_entries),
        )
        .route(
            "/entries/:id",
            get(entries::get_entry)
                .put(entries::update_entry)
                .delete(entries::delete_entry),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}
