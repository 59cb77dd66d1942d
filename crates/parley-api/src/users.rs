use axum::{Extension, Json, extract::State, http::StatusCode};

use parley_types::api::{Claims, StatusRequest, UpdateProfileRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::UserView;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::views;

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    let rows = state.db.list_users()?;
    Ok(Json(rows.into_iter().map(views::user_view).collect()))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserView>, ApiError> {
    let row = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::Unauthenticated)?;
    Ok(Json(views::user_view(row)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserView>, ApiError> {
    if let Some(name) = &req.display_name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("display name must not be empty".into()));
        }
    }

    let id = claims.sub.to_string();
    if !state
        .db
        .update_profile(&id, req.display_name.as_deref(), req.avatar_url.as_deref())?
    {
        // Valid token but the account row is gone.
        return Err(ApiError::Unauthenticated);
    }

    let row = state
        .db
        .get_user_by_id(&id)?
        .ok_or(ApiError::Unauthenticated)?;
    Ok(Json(views::user_view(row)))
}

/// Best-effort presence beacon. The gateway connection lifecycle is the
/// authoritative source; this covers tab-close and app-foreground flips.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StatusRequest>,
) -> Result<StatusCode, ApiError> {
    let row = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::Unauthenticated)?;

    state.db.set_online(&row.id, req.is_online)?;
    state.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
        user_id: claims.sub,
        display_name: row.display_name,
        online: req.is_online,
        last_seen: if req.is_online {
            None
        } else {
            Some(chrono::Utc::now())
        },
    });

    Ok(StatusCode::NO_CONTENT)
}
