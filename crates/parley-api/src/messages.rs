use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use parley_types::api::{
    Claims, DeleteMessageResponse, MarkReadResponse, MessageQuery, SendMessageRequest,
};
use parley_types::events::GatewayEvent;
use parley_types::models::MessageView;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::views;

/// Messages oldest-first, optionally windowed by `before`/`limit`.
/// Outsiders see an empty history, not an error.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let cid = conversation_id.to_string();
    if !state.db.is_member(&cid, &claims.sub.to_string())? {
        return Ok(Json(vec![]));
    }

    let before = query.before.map(|dt| dt.timestamp_millis());
    let limit = query.limit.map(|limit| limit.min(200));

    // Run blocking DB reads off the async runtime
    let db = state.clone();
    let (rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        let rows = db.db.list_messages(&cid, before, limit)?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.db.reactions_for_messages(&message_ids)?;
        Ok::<_, anyhow::Error>((rows, reaction_rows))
    })
    .await
    .map_err(anyhow::Error::new)??;

    let mut reaction_map = views::reaction_groups(&reaction_rows);
    let messages = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            views::message_view(row, reactions)
        })
        .collect();

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::Validation(
            "message content must not be empty".into(),
        ));
    }

    let cid = conversation_id.to_string();
    let sender = claims.sub.to_string();

    // Sending into a conversation the caller cannot see fails loudly.
    if !state.db.is_member(&cid, &sender)? {
        return Err(ApiError::NotFound);
    }

    let message_id = Uuid::new_v4();

    // Run blocking DB insert off the async runtime
    let db = state.clone();
    let client_key = req.client_key.map(|key| key.to_string());
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .append_message(&message_id.to_string(), &cid, &sender, &content, client_key.as_deref())
    })
    .await
    .map_err(anyhow::Error::new)??;

    // A different id back means the client_key matched an earlier send;
    // members already saw that message and may have reacted to it since.
    let created = row.id == message_id.to_string();
    let reactions = if created {
        vec![]
    } else {
        let reaction_rows = state.db.reactions_for_messages(&[row.id.clone()])?;
        views::reaction_groups(&reaction_rows)
            .remove(&row.id)
            .unwrap_or_default()
    };
    let view = views::message_view(row, reactions);

    if created {
        let members = views::member_uuids(&state.db, conversation_id)?;
        state
            .dispatcher
            .fan_out(
                &members,
                GatewayEvent::MessageCreate {
                    message: view.clone(),
                },
            )
            .await;

        // Sending is the natural end of typing.
        if state.typing.set_typing(conversation_id, claims.sub, false) {
            state
                .dispatcher
                .fan_out(
                    &members,
                    GatewayEvent::TypingStop {
                        conversation_id,
                        user_id: claims.sub,
                    },
                )
                .await;
        }
    }

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(view)))
}

/// Author-only soft delete. Missing ids and other people's messages are a
/// silent no-op with `deleted: false`.
pub async fn delete_message(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<DeleteMessageResponse>, ApiError> {
    let deleted = state.db.soft_delete_message(
        &message_id.to_string(),
        &conversation_id.to_string(),
        &claims.sub.to_string(),
    )?;

    if deleted {
        let members = views::member_uuids(&state.db, conversation_id)?;
        state
            .dispatcher
            .fan_out(
                &members,
                GatewayEvent::MessageDelete {
                    conversation_id,
                    message_id,
                },
            )
            .await;
    }

    Ok(Json(DeleteMessageResponse { deleted }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let cid = conversation_id.to_string();
    let reader = claims.sub.to_string();

    // Outsiders cannot flip read flags on messages they cannot see.
    if !state.db.is_member(&cid, &reader)? {
        return Ok(Json(MarkReadResponse { marked: 0 }));
    }

    let db = state.clone();
    let marked = tokio::task::spawn_blocking(move || db.db.mark_conversation_read(&cid, &reader))
        .await
        .map_err(anyhow::Error::new)??;

    if marked > 0 {
        let members = views::member_uuids(&state.db, conversation_id)?;
        state
            .dispatcher
            .fan_out(
                &members,
                GatewayEvent::ConversationRead {
                    conversation_id,
                    reader_id: claims.sub,
                    marked,
                },
            )
            .await;
    }

    Ok(Json(MarkReadResponse { marked }))
}
