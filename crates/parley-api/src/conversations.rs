use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{
    Claims, ConversationCreatedResponse, CreateGroupRequest, DirectConversationRequest,
    TypingRequest, TypingStatusResponse,
};
use parley_types::events::GatewayEvent;
use parley_types::models::{ConversationSummary, ConversationView, ParticipantView};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::views;

/// Find-or-create the direct conversation with another user. Calling this
/// twice, or from the other side, lands on the same conversation.
pub async fn create_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DirectConversationRequest>,
) -> Result<(StatusCode, Json<ConversationCreatedResponse>), ApiError> {
    if req.other_user_id == claims.sub {
        return Err(ApiError::Validation(
            "cannot start a conversation with yourself".into(),
        ));
    }
    if state
        .db
        .get_user_by_id(&req.other_user_id.to_string())?
        .is_none()
    {
        return Err(ApiError::NotFound);
    }

    let new_id = Uuid::new_v4();
    let (conversation_id, created) = state.db.create_or_get_direct(
        &new_id.to_string(),
        &claims.sub.to_string(),
        &req.other_user_id.to_string(),
    )?;
    let conversation_id = views::parse_id(&conversation_id, "conversation id");

    if created {
        info!(
            "{} opened direct conversation {} with {}",
            claims.username, conversation_id, req.other_user_id
        );
        state
            .dispatcher
            .fan_out(
                &[claims.sub, req.other_user_id],
                GatewayEvent::ConversationCreate {
                    conversation_id,
                    is_group: false,
                    name: None,
                },
            )
            .await;
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(ConversationCreatedResponse {
            conversation_id,
            created,
        }),
    ))
}

/// Find-only lookup of a direct conversation. Never creates.
pub async fn find_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(other_user_id): Path<Uuid>,
) -> Result<Json<Option<Uuid>>, ApiError> {
    let found = state
        .db
        .find_direct_conversation(&claims.sub.to_string(), &other_user_id.to_string())?;
    Ok(Json(found.map(|id| views::parse_id(&id, "conversation id"))))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ConversationCreatedResponse>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("group name must not be empty".into()));
    }

    // The creator is always a member and does not count toward the minimum.
    let mut member_ids = req.member_ids;
    member_ids.sort();
    member_ids.dedup();
    member_ids.retain(|id| *id != claims.sub);
    if member_ids.len() < 2 {
        return Err(ApiError::Validation(
            "a group needs at least 2 other members".into(),
        ));
    }

    for member_id in &member_ids {
        if state.db.get_user_by_id(&member_id.to_string())?.is_none() {
            return Err(ApiError::NotFound);
        }
    }

    let conversation_id = Uuid::new_v4();
    let member_strings: Vec<String> = member_ids.iter().map(Uuid::to_string).collect();
    state.db.create_group(
        &conversation_id.to_string(),
        name,
        &claims.sub.to_string(),
        &member_strings,
    )?;

    info!(
        "{} created group '{}' with {} members",
        claims.username,
        name,
        member_ids.len() + 1
    );

    let mut recipients = member_ids;
    recipients.push(claims.sub);
    state
        .dispatcher
        .fan_out(
            &recipients,
            GatewayEvent::ConversationCreate {
                conversation_id,
                is_group: true,
                name: Some(name.to_string()),
            },
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(ConversationCreatedResponse {
            conversation_id,
            created: true,
        }),
    ))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let caller = claims.sub.to_string();
    let rows = state.db.conversations_for_user(&caller)?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let member_count = state.db.conversation_member_ids(&row.id)?.len();
        let unread_count = state.db.unread_count(&row.id, &caller)? as usize;
        summaries.push(ConversationSummary {
            id: views::parse_id(&row.id, "conversation id"),
            is_group: row.is_group,
            name: row.name,
            member_count,
            unread_count,
        });
    }
    Ok(Json(summaries))
}

/// Conversation metadata relative to the caller: for direct conversations
/// the counterpart is whoever the caller is not. Unknown ids and outsider
/// callers get `null`, not an error.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Option<ConversationView>>, ApiError> {
    let cid = conversation_id.to_string();
    let caller = claims.sub.to_string();

    let row = match state.db.get_conversation(&cid)? {
        Some(row) => row,
        None => return Ok(Json(None)),
    };
    if !state.db.is_member(&cid, &caller)? {
        return Ok(Json(None));
    }

    let member_ids = state.db.conversation_member_ids(&cid)?;
    let other_user = if row.is_group {
        None
    } else {
        match member_ids.iter().find(|id| **id != caller) {
            Some(other_id) => state.db.get_user_by_id(other_id)?.map(|user| ParticipantView {
                id: views::parse_id(&user.id, "user id"),
                display_name: user.display_name,
                avatar_url: user.avatar_url,
                is_online: user.is_online,
                last_seen: user.last_seen.map(views::timestamp),
            }),
            None => None,
        }
    };

    Ok(Json(Some(ConversationView {
        id: conversation_id,
        is_group: row.is_group,
        name: row.name,
        member_count: member_ids.len(),
        other_user,
        created_at: views::timestamp(row.created_at),
    })))
}

/// Display names of everyone typing right now, excluding the caller.
pub async fn typing_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<TypingStatusResponse>, ApiError> {
    if !state
        .db
        .is_member(&conversation_id.to_string(), &claims.sub.to_string())?
    {
        return Ok(Json(TypingStatusResponse { typing: vec![] }));
    }

    let mut typing = Vec::new();
    for user_id in state.typing.typing_users(conversation_id) {
        if user_id == claims.sub {
            continue;
        }
        if let Some(user) = state.db.get_user_by_id(&user_id.to_string())? {
            typing.push(user.display_name);
        }
    }
    Ok(Json(TypingStatusResponse { typing }))
}

/// HTTP twin of the gateway SetTyping command, for clients without a live
/// socket. Outsider calls change nothing.
pub async fn set_typing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<TypingRequest>,
) -> Result<StatusCode, ApiError> {
    if !state
        .db
        .is_member(&conversation_id.to_string(), &claims.sub.to_string())?
    {
        return Ok(StatusCode::NO_CONTENT);
    }

    // Only liveness transitions fan out; refreshes just slide the deadline.
    if state.typing.set_typing(conversation_id, claims.sub, req.is_typing) {
        let members = views::member_uuids(&state.db, conversation_id)?;
        let display_name = state
            .db
            .get_user_by_id(&claims.sub.to_string())?
            .map(|user| user.display_name)
            .unwrap_or_else(|| claims.username.clone());

        let event = if req.is_typing {
            GatewayEvent::TypingStart {
                conversation_id,
                user_id: claims.sub,
                display_name,
            }
        } else {
            GatewayEvent::TypingStop {
                conversation_id,
                user_id: claims.sub,
            }
        };
        state.dispatcher.fan_out(&members, event).await;
    }

    Ok(StatusCode::NO_CONTENT)
}
