pub mod health;
pub mod notification;
pub mod subscription;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /notify                                          notify (service role)
///
/// /targets/{target_type}/{target_id}/profile       get, register (service role)
/// /targets/{target_type}/{target_id}/notifications see routes::notification
/// /targets/{target_type}/{target_id}/subscriptions see routes::subscription
/// ```
pub fn api_routes() -> Router<AppState> {
    let target_routes = Router::new()
        .route(
            "/profile",
            get(handlers::target::show_profile).put(handlers::target::upsert_profile),
        )
        .nest("/notifications", notification::router())
        .nest("/subscriptions", subscription::router());

    Router::new()
        .route("/notify", post(handlers::notify::notify))
        .nest("/targets/{target_type}/{target_id}", target_routes)
}
