//! Target directory endpoints. Registering a profile is a service call;
//! reading it back is open to the target itself.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tidings_core::entity::EntityRef;
use tidings_core::types::DbId;
use tidings_db::models::target::TargetProfile;

use crate::error::AppResult;
use crate::middleware::rbac::{AuthorizedTarget, RequireService};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TargetPath {
    pub target_type: String,
    pub target_id: DbId,
}

/// Body of `PUT .../profile`. Omitted policy fields fall back to the
/// configured defaults.
#[derive(Debug, Default, Deserialize)]
pub struct UpsertProfile {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub email_allowed: Option<bool>,
    pub batch_email_allowed: Option<bool>,
    pub subscription_allowed: Option<bool>,
}

/// PUT /targets/{target_type}/{target_id}/profile
pub async fn upsert_profile(
    RequireService(_caller): RequireService,
    State(state): State<AppState>,
    Path(path): Path<TargetPath>,
    Json(input): Json<UpsertProfile>,
) -> AppResult<Json<DataResponse<TargetProfile>>> {
    let profile = TargetProfile {
        entity: EntityRef::new(path.target_type, path.target_id),
        email: input.email,
        display_name: input.display_name,
        email_allowed: input.email_allowed,
        batch_email_allowed: input.batch_email_allowed,
        subscription_allowed: input.subscription_allowed,
    };
    let profile = state.services.targets.register(&profile).await?;
    tracing::info!(target_ref = %profile.entity, "Target profile registered");

    Ok(Json(DataResponse { data: profile }))
}

/// GET /targets/{target_type}/{target_id}/profile
pub async fn show_profile(
    auth: AuthorizedTarget,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<TargetProfile>>> {
    let profile = state.services.targets.resolve(&auth.target).await?;
    Ok(Json(DataResponse { data: profile }))
}
