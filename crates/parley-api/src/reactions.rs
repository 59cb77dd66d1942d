use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use parley_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::views;

/// Toggle the caller's emoji on a message. A vanished target and an
/// outsider caller both yield the same silent no-op (`added: null`).
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ApiError> {
    if req.emoji.trim().is_empty() {
        return Err(ApiError::Validation("emoji must not be empty".into()));
    }

    if !state
        .db
        .is_member(&conversation_id.to_string(), &claims.sub.to_string())?
    {
        return Ok(Json(ToggleReactionResponse { added: None }));
    }

    let added = state.db.toggle_reaction(
        &message_id.to_string(),
        &conversation_id.to_string(),
        &claims.sub.to_string(),
        &req.emoji,
    )?;

    match added {
        Some(true) => {
            let members = views::member_uuids(&state.db, conversation_id)?;
            state
                .dispatcher
                .fan_out(
                    &members,
                    GatewayEvent::ReactionAdd {
                        conversation_id,
                        message_id,
                        user_id: claims.sub,
                        emoji: req.emoji,
                    },
                )
                .await;
        }
        Some(false) => {
            let members = views::member_uuids(&state.db, conversation_id)?;
            state
                .dispatcher
                .fan_out(
                    &members,
                    GatewayEvent::ReactionRemove {
                        conversation_id,
                        message_id,
                        user_id: claims.sub,
                        emoji: req.emoji,
                    },
                )
                .await;
        }
        None => {}
    }

    Ok(Json(ToggleReactionResponse { added }))
}
