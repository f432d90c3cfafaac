//! Route definitions for a target's subscriptions.
//!
//! Mounted at `/targets/{target_type}/{target_id}/subscriptions`.
//!
//! ```text
//! GET    /                                      list
//! POST   /                                      create (find or create by key)
//! GET    /find?key=                             find
//! GET    /{id}                                  show
//! DELETE /{id}                                  destroy
//! PUT    /{id}/subscribe                        subscribe
//! PUT    /{id}/unsubscribe                      unsubscribe
//! PUT    /{id}/subscribe-to-email               subscribe_to_email
//! PUT    /{id}/unsubscribe-to-email             unsubscribe_to_email
//! PUT    /{id}/subscribe-to-optional-target     subscribe_to_optional_target
//! PUT    /{id}/unsubscribe-to-optional-target   unsubscribe_to_optional_target
//! ```

use axum::routing::{get, put};
use axum::Router;

use crate::handlers::subscription;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(subscription::list).post(subscription::create),
        )
        .route("/find", get(subscription::find))
        .route(
            "/{id}",
            get(subscription::show).delete(subscription::destroy),
        )
        .route("/{id}/subscribe", put(subscription::subscribe))
        .route("/{id}/unsubscribe", put(subscription::unsubscribe))
        .route(
            "/{id}/subscribe-to-email",
            put(subscription::subscribe_to_email),
        )
        .route(
            "/{id}/unsubscribe-to-email",
            put(subscription::unsubscribe_to_email),
        )
        .route(
            "/{id}/subscribe-to-optional-target",
            put(subscription::subscribe_to_optional_target),
        )
        .route(
            "/{id}/unsubscribe-to-optional-target",
            put(subscription::unsubscribe_to_optional_target),
        )
}
