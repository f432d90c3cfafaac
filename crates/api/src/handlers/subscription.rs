//! Handlers for `/targets/{target_type}/{target_id}/subscriptions`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tidings_core::types::DbId;
use tidings_db::models::subscription::Subscription;

use crate::error::AppResult;
use crate::middleware::rbac::AuthorizedTarget;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ItemPath {
    pub id: DbId,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    pub with_email_subscription: Option<bool>,
    pub with_optional_targets: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct OptionalTargetParams {
    pub optional_target_name: String,
}

type SubscriptionResponse = AppResult<Json<DataResponse<Subscription>>>;

fn respond(subscription: Subscription) -> SubscriptionResponse {
    Ok(Json(DataResponse { data: subscription }))
}

/// GET /targets/{target_type}/{target_id}/subscriptions
pub async fn list(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<DataResponse<Vec<Subscription>>>> {
    let subscriptions = state
        .services
        .subscriptions
        .list(&auth.target, params.limit, params.offset)
        .await?;
    Ok(Json(DataResponse {
        data: subscriptions,
    }))
}

/// POST /targets/{target_type}/{target_id}/subscriptions
///
/// Returns the existing row for the key, or one created from the
/// configured defaults.
pub async fn create(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Json(input): Json<KeyParams>,
) -> SubscriptionResponse {
    let subscription = state
        .services
        .subscriptions
        .find_or_create(&auth.target, &input.key)
        .await?;
    respond(subscription)
}

/// GET /targets/{target_type}/{target_id}/subscriptions/find?key=
pub async fn find(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Query(params): Query<KeyParams>,
) -> SubscriptionResponse {
    let subscription = state
        .services
        .subscriptions
        .find_by_key(&auth.target, &params.key)
        .await?;
    respond(subscription)
}

/// GET /targets/{target_type}/{target_id}/subscriptions/{id}
pub async fn show(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> SubscriptionResponse {
    let subscription = state
        .services
        .subscriptions
        .find_for_target(&auth.target, path.id)
        .await?;
    respond(subscription)
}

/// DELETE /targets/{target_type}/{target_id}/subscriptions/{id}
pub async fn destroy(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> AppResult<impl IntoResponse> {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    service.destroy(&subscription).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /targets/{target_type}/{target_id}/subscriptions/{id}/subscribe
pub async fn subscribe(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
    Query(params): Query<SubscribeParams>,
) -> SubscriptionResponse {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    let subscription = service
        .subscribe(
            subscription,
            params.with_email_subscription.unwrap_or(true),
            params.with_optional_targets.unwrap_or(true),
        )
        .await?;
    respond(subscription)
}

/// PUT /targets/{target_type}/{target_id}/subscriptions/{id}/unsubscribe
pub async fn unsubscribe(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> SubscriptionResponse {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    respond(service.unsubscribe(subscription).await?)
}

/// PUT /targets/{target_type}/{target_id}/subscriptions/{id}/subscribe-to-email
///
/// Rejected with 400 while the key itself is unsubscribed.
pub async fn subscribe_to_email(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> SubscriptionResponse {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    respond(service.subscribe_to_email(subscription).await?)
}

/// PUT /targets/{target_type}/{target_id}/subscriptions/{id}/unsubscribe-to-email
pub async fn unsubscribe_to_email(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> SubscriptionResponse {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    respond(service.unsubscribe_to_email(subscription).await?)
}

/// PUT /targets/{target_type}/{target_id}/subscriptions/{id}/subscribe-to-optional-target
pub async fn subscribe_to_optional_target(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
    Query(params): Query<OptionalTargetParams>,
) -> SubscriptionResponse {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    let subscription = service
        .subscribe_to_optional_target(subscription, &params.optional_target_name)
        .await?;
    respond(subscription)
}

/// PUT /targets/{target_type}/{target_id}/subscriptions/{id}/unsubscribe-to-optional-target
pub async fn unsubscribe_to_optional_target(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
    Query(params): Query<OptionalTargetParams>,
) -> SubscriptionResponse {
    let service = &state.services.subscriptions;
    let subscription = service.find_for_target(&auth.target, path.id).await?;
    let subscription = service
        .unsubscribe_to_optional_target(subscription, &params.optional_target_name)
        .await?;
    respond(subscription)
}
