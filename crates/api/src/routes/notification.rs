//! Route definitions for a target's notifications.
//!
//! Mounted at `/targets/{target_type}/{target_id}/notifications`.
//!
//! ```text
//! GET    /                    index
//! GET    /unopened-count      unopened_count
//! POST   /open-all            open_all
//! GET    /{id}                show
//! DELETE /{id}                destroy
//! PUT    /{id}/open           open
//! ```

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::notification;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(notification::index))
        .route("/unopened-count", get(notification::unopened_count))
        .route("/open-all", post(notification::open_all))
        .route(
            "/{id}",
            get(notification::show).delete(notification::destroy),
        )
        .route("/{id}/open", put(notification::open))
}
