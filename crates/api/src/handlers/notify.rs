use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tidings_events::{NotifyOutcome, NotifyRequest};

use crate::error::AppResult;
use crate::middleware::rbac::RequireService;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /notify
///
/// Generates one notification per resolved target and delivers it, now or
/// through the background worker when `notify_later` is set.
pub async fn notify(
    RequireService(caller): RequireService,
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<NotifyOutcome>>)> {
    tracing::debug!(
        caller = %caller.subject,
        notifiable = %request.notifiable.entity,
        targets = request.targets.len(),
        "Notify requested",
    );
    let outcome = state.services.notifier.notify(request).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: outcome })))
}
