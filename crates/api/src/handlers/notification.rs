//! Handlers for `/targets/{target_type}/{target_id}/notifications`.
//!
//! Every endpoint requires a token for the path target (or an admin
//! token) via [`AuthorizedTarget`].

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tidings_core::entity::EntityRef;
use tidings_core::types::{DbId, SortOrder, Timestamp};
use tidings_db::models::notification::{
    GroupSummary, Notification, NotificationFilter, OpenedFilter,
};
use tidings_events::notifications::IndexOptions;

use crate::error::{AppError, AppResult};
use crate::middleware::rbac::AuthorizedTarget;
use crate::response::DataResponse;
use crate::state::AppState;

/// Maximum page size for filtered listings.
const MAX_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Query / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ItemPath {
    pub id: DbId,
}

/// Narrowing criteria shared by listing and open-all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterQuery {
    pub filtered_by_key: Option<String>,
    pub filtered_by_type: Option<String>,
    pub filtered_by_group_type: Option<String>,
    pub filtered_by_group_id: Option<DbId>,
    pub later_than: Option<Timestamp>,
    pub earlier_than: Option<Timestamp>,
}

impl FilterQuery {
    fn is_empty(&self) -> bool {
        self.filtered_by_key.is_none()
            && self.filtered_by_type.is_none()
            && self.filtered_by_group_type.is_none()
            && self.filtered_by_group_id.is_none()
            && self.later_than.is_none()
            && self.earlier_than.is_none()
    }

    fn apply(&self, filter: NotificationFilter) -> AppResult<NotificationFilter> {
        let group = match (&self.filtered_by_group_type, self.filtered_by_group_id) {
            (Some(t), Some(id)) => Some(EntityRef::new(t, id)),
            (None, None) => None,
            _ => {
                return Err(AppError::BadRequest(
                    "filtered_by_group_type and filtered_by_group_id go together".into(),
                ))
            }
        };
        Ok(NotificationFilter {
            key: self.filtered_by_key.clone(),
            notifiable_type: self.filtered_by_type.clone(),
            group,
            later_than: self.later_than,
            earlier_than: self.earlier_than,
            ..filter
        })
    }
}

/// Query parameters for the notification index.
///
/// Without `filter` or any `filtered_by_*` parameter the response is the
/// target's index: unopened notifications, then recently opened ones.
#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    pub filter: Option<OpenedFilter>,
    pub reverse: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub with_group_members: Option<bool>,
    pub filtered_by_key: Option<String>,
    pub filtered_by_type: Option<String>,
    pub filtered_by_group_type: Option<String>,
    pub filtered_by_group_id: Option<DbId>,
    pub later_than: Option<Timestamp>,
    pub earlier_than: Option<Timestamp>,
}

impl IndexQuery {
    // Not `#[serde(flatten)]`: flattened numbers do not survive urlencoded input.
    fn criteria(&self) -> FilterQuery {
        FilterQuery {
            filtered_by_key: self.filtered_by_key.clone(),
            filtered_by_type: self.filtered_by_type.clone(),
            filtered_by_group_type: self.filtered_by_group_type.clone(),
            filtered_by_group_id: self.filtered_by_group_id,
            later_than: self.later_than,
            earlier_than: self.earlier_than,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenQuery {
    /// Also open unopened group members. Defaults to `true`.
    pub with_members: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct NotificationDetail {
    pub notification: Notification,
    pub group: GroupSummary,
}

#[derive(Debug, Serialize)]
pub struct UnopenedCount {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct OpenAllResult {
    pub opened: u64,
}

#[derive(Debug, Serialize)]
pub struct OpenResult {
    pub opened: u64,
    pub notification: Notification,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /targets/{target_type}/{target_id}/notifications
pub async fn index(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Query(params): Query<IndexQuery>,
) -> AppResult<Json<DataResponse<Vec<Notification>>>> {
    let service = &state.services.notifications;
    let with_members = params.with_group_members.unwrap_or(false);
    let criteria = params.criteria();

    let notifications = if params.filter.is_none() && criteria.is_empty() {
        let options = IndexOptions {
            reverse: params.reverse.unwrap_or(false),
            limit: params.limit.map(|l| l.clamp(1, MAX_LIMIT)),
            with_group_members: with_members,
        };
        service.index(&auth.target, &options).await?
    } else {
        let order = if params.reverse.unwrap_or(false) {
            SortOrder::Earliest
        } else {
            SortOrder::Latest
        };
        let filter = criteria.apply(NotificationFilter {
            owners_only: !with_members,
            limit: Some(params.limit.unwrap_or(MAX_LIMIT).clamp(1, MAX_LIMIT)),
            offset: params.offset.map(|o| o.max(0)),
            ..NotificationFilter::for_target(auth.target.clone())
                .opened(params.filter.unwrap_or_default())
                .order(order)
        })?;
        service.list(&filter).await?
    };

    Ok(Json(DataResponse {
        data: notifications,
    }))
}

/// GET /targets/{target_type}/{target_id}/notifications/unopened-count
pub async fn unopened_count(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<UnopenedCount>>> {
    let count = state
        .services
        .notifications
        .unopened_count(&auth.target)
        .await?;

    Ok(Json(DataResponse {
        data: UnopenedCount { count },
    }))
}

/// POST /targets/{target_type}/{target_id}/notifications/open-all
///
/// Opens every unopened notification of the target that matches the
/// `filtered_by_*` criteria and returns how many were opened.
pub async fn open_all(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Query(params): Query<FilterQuery>,
) -> AppResult<Json<DataResponse<OpenAllResult>>> {
    let filter = params.apply(NotificationFilter::default())?;
    let opened = state
        .services
        .notifications
        .open_all_of(&auth.target, filter, None)
        .await?;

    Ok(Json(DataResponse {
        data: OpenAllResult { opened },
    }))
}

/// GET /targets/{target_type}/{target_id}/notifications/{id}
pub async fn show(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> AppResult<Json<DataResponse<NotificationDetail>>> {
    let service = &state.services.notifications;
    let notification = service.find_for_target(&auth.target, path.id).await?;
    let group = service.group_summary(&notification).await?;

    Ok(Json(DataResponse {
        data: NotificationDetail {
            notification,
            group,
        },
    }))
}

/// PUT /targets/{target_type}/{target_id}/notifications/{id}/open
///
/// Opening an already-opened notification is a no-op (`opened: 0`).
pub async fn open(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
    Query(params): Query<OpenQuery>,
) -> AppResult<Json<DataResponse<OpenResult>>> {
    let service = &state.services.notifications;
    let notification = service.find_for_target(&auth.target, path.id).await?;
    let opened = service
        .open(&notification, None, params.with_members.unwrap_or(true))
        .await?;
    let notification = service.find(notification.id).await?;

    Ok(Json(DataResponse {
        data: OpenResult {
            opened,
            notification,
        },
    }))
}

/// DELETE /targets/{target_type}/{target_id}/notifications/{id}
pub async fn destroy(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
    Path(path): Path<ItemPath>,
) -> AppResult<impl IntoResponse> {
    let service = &state.services.notifications;
    let notification = service.find_for_target(&auth.target, path.id).await?;
    service.destroy(&notification).await?;

    Ok(StatusCode::NO_CONTENT)
}
