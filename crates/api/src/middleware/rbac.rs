//! Role-based access control extractors.

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use serde::Deserialize;
use tidings_core::entity::EntityRef;
use tidings_core::error::CoreError;
use tidings_core::types::DbId;

use super::auth::AuthUser;
use crate::auth::{ROLE_ADMIN, ROLE_SERVICE};
use crate::error::AppError;
use crate::state::AppState;

/// Requires the `service` or `admin` role. Rejects with 403 otherwise.
///
/// ```ignore
/// async fn notify(RequireService(caller): RequireService) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
pub struct RequireService(pub AuthUser);

impl FromRequestParts<AppState> for RequireService {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != ROLE_SERVICE && user.role != ROLE_ADMIN {
            return Err(CoreError::Forbidden("Service or Admin role required".into()).into());
        }
        Ok(RequireService(user))
    }
}

#[derive(Debug, Deserialize)]
struct TargetParams {
    target_type: String,
    target_id: DbId,
}

/// The `{target_type}/{target_id}` path target, checked against the caller.
///
/// Rejects with 401 without a valid token and with 403 when the token was
/// issued to a different target and the caller is not an admin.
#[derive(Debug, Clone)]
pub struct AuthorizedTarget {
    pub target: EntityRef,
    pub caller: AuthUser,
}

impl FromRequestParts<AppState> for AuthorizedTarget {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let caller = AuthUser::from_request_parts(parts, state).await?;
        let Path(params) = Path::<TargetParams>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let target = EntityRef::new(params.target_type, params.target_id);
        target.validate()?;
        if !caller.can_access(&target) {
            return Err(CoreError::Forbidden(format!("Not allowed to access {target}")).into());
        }
        Ok(AuthorizedTarget { target, caller })
    }
}
