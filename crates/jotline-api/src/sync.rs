use axum::extract::{Query, State};
use axum::{Extension, Json};
use jotline_core::sync::{PullQuery, PullResponse, PushRequest, PushResponse};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::rate_limit::ProtectedEndpoint;
use crate::routes::AppState;
use crate::user_fingerprint;

pub async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    state
        .rate_limiter
        .check(ProtectedEndpoint::Sync, &user.user_id)
        .await?;
    if query.since < 0 {
        return Err(AppError::bad_request("since must not be negative"));
    }

    let response = state
        .store
        .pull(&user.user_id, &query, state.config.sync_max_page_size)
        .await?;
    tracing::debug!(
        endpoint = "sync_pull",
        user = user_fingerprint(&user.user_id),
        entity = %query.entity,
        since = query.since,
        offset = query.offset,
        returned = response.changes.len(),
        "Served pull page"
    );
    Ok(Json(response))
}

pub async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    state
        .rate_limiter
        .check(ProtectedEndpoint::Sync, &user.user_id)
        .await?;

    let response = state.store.push(&user.user_id, &request).await?;
    tracing::info!(
        endpoint = "sync_push",
        user = user_fingerprint(&user.user_id),
        synced = response.synced_record_ids.len(),
        conflicts = response.conflicts.len(),
        "Applied push"
    );
    Ok(Json(response))
}
