//! End-to-end flows through the real handlers against an on-disk database:
//! register, resolve conversations, exchange messages, react, read, type.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tempfile::TempDir;
use uuid::Uuid;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::error::ApiError;
use parley_api::{conversations, messages, reactions, users};
use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::typing::TypingTracker;
use parley_types::api::{
    Claims, CreateGroupRequest, DirectConversationRequest, LoginRequest, MessageQuery,
    RegisterRequest, SendMessageRequest, StatusRequest, ToggleReactionRequest, TypingRequest,
    UpdateProfileRequest,
};
use parley_types::events::GatewayEvent;
use parley_types::models::MessageView;

fn test_state() -> (TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("parley.db")).unwrap());
    let state = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(),
        typing: TypingTracker::new(),
        jwt_secret: "integration-test-secret".into(),
    });
    (dir, state)
}

async fn register_user(state: &AppState, username: &str) -> Claims {
    let (status, Json(resp)) = auth::register(
        State(state.clone()),
        Json(RegisterRequest {
            username: username.into(),
            password: "correct-horse-battery".into(),
            display_name: None,
            avatar_url: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    Claims {
        sub: resp.user_id,
        username: username.into(),
        exp: 0,
    }
}

async fn open_direct(state: &AppState, caller: &Claims, other: &Claims) -> Uuid {
    let (_, Json(resp)) = conversations::create_direct(
        State(state.clone()),
        Extension(caller.clone()),
        Json(DirectConversationRequest {
            other_user_id: other.sub,
        }),
    )
    .await
    .unwrap();
    resp.conversation_id
}

async fn send(state: &AppState, sender: &Claims, conversation: Uuid, content: &str) -> MessageView {
    let (status, Json(view)) = messages::send_message(
        State(state.clone()),
        Path(conversation),
        Extension(sender.clone()),
        Json(SendMessageRequest {
            content: content.into(),
            client_key: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    view
}

async fn list(state: &AppState, caller: &Claims, conversation: Uuid) -> Vec<MessageView> {
    let Json(views) = messages::get_messages(
        State(state.clone()),
        Path(conversation),
        Query(MessageQuery {
            limit: None,
            before: None,
        }),
        Extension(caller.clone()),
    )
    .await
    .unwrap();
    views
}

#[tokio::test]
async fn direct_conversation_is_shared_between_both_sides() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;

    let (_, mut bob_rx) = state.dispatcher.register_user_channel(bob.sub).await;

    let (status, Json(first)) = conversations::create_direct(
        State(state.clone()),
        Extension(alice.clone()),
        Json(DirectConversationRequest {
            other_user_id: bob.sub,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert!(first.created);

    // Bob hears about the conversation he was just pulled into.
    let event = bob_rx.try_recv().unwrap();
    assert!(matches!(
        event,
        GatewayEvent::ConversationCreate {
            conversation_id,
            is_group: false,
            ..
        } if conversation_id == first.conversation_id
    ));

    // Resolving from Bob's side lands on the same conversation.
    let (status, Json(second)) = conversations::create_direct(
        State(state.clone()),
        Extension(bob.clone()),
        Json(DirectConversationRequest {
            other_user_id: alice.sub,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(!second.created);
    assert_eq!(second.conversation_id, first.conversation_id);
    assert!(bob_rx.try_recv().is_err());

    let Json(found) = conversations::find_direct(
        State(state.clone()),
        Extension(alice.clone()),
        Path(bob.sub),
    )
    .await
    .unwrap();
    assert_eq!(found, Some(first.conversation_id));

    let err = conversations::create_direct(
        State(state.clone()),
        Extension(alice.clone()),
        Json(DirectConversationRequest {
            other_user_id: alice.sub,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let err = conversations::create_direct(
        State(state.clone()),
        Extension(alice.clone()),
        Json(DirectConversationRequest {
            other_user_id: Uuid::new_v4(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[tokio::test]
async fn message_and_reaction_dance() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    let (_, mut bob_rx) = state.dispatcher.register_user_channel(bob.sub).await;

    let sent = send(&state, &alice, conversation, "hi").await;
    assert_eq!(sent.content.as_deref(), Some("hi"));
    assert_eq!(sent.sender_name, "alice");

    let event = bob_rx.try_recv().unwrap();
    let GatewayEvent::MessageCreate { message } = event else {
        panic!("expected MessageCreate, got {:?}", event);
    };
    assert_eq!(message.id, sent.id);
    assert_eq!(message.content.as_deref(), Some("hi"));

    // Bob thumbs it up.
    let Json(resp) = reactions::toggle_reaction(
        State(state.clone()),
        Path((conversation, sent.id)),
        Extension(bob.clone()),
        Json(ToggleReactionRequest { emoji: "👍".into() }),
    )
    .await
    .unwrap();
    assert_eq!(resp.added, Some(true));
    assert!(matches!(
        bob_rx.try_recv().unwrap(),
        GatewayEvent::ReactionAdd { emoji, user_id, .. } if emoji == "👍" && user_id == bob.sub
    ));

    let listed = list(&state, &alice, conversation).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].reactions.len(), 1);
    assert_eq!(listed[0].reactions[0].emoji, "👍");
    assert_eq!(listed[0].reactions[0].count, 1);
    assert_eq!(listed[0].reactions[0].user_ids, vec![bob.sub]);

    // Toggling again removes his reaction and with it the group.
    let Json(resp) = reactions::toggle_reaction(
        State(state.clone()),
        Path((conversation, sent.id)),
        Extension(bob.clone()),
        Json(ToggleReactionRequest { emoji: "👍".into() }),
    )
    .await
    .unwrap();
    assert_eq!(resp.added, Some(false));
    let listed = list(&state, &alice, conversation).await;
    assert!(listed[0].reactions.is_empty());

    // A vanished target is a silent no-op.
    let Json(resp) = reactions::toggle_reaction(
        State(state.clone()),
        Path((conversation, Uuid::new_v4())),
        Extension(bob.clone()),
        Json(ToggleReactionRequest { emoji: "👍".into() }),
    )
    .await
    .unwrap();
    assert_eq!(resp.added, None);
}

#[tokio::test]
async fn group_views_are_relative_to_membership() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let carol = register_user(&state, "carol").await;
    let dave = register_user(&state, "dave").await;

    let (status, Json(resp)) = conversations::create_group(
        State(state.clone()),
        Extension(alice.clone()),
        Json(CreateGroupRequest {
            name: "  Trip  ".into(),
            member_ids: vec![bob.sub, carol.sub, bob.sub],
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    let group = resp.conversation_id;

    let Json(view) = conversations::get_conversation(
        State(state.clone()),
        Extension(bob.clone()),
        Path(group),
    )
    .await
    .unwrap();
    let view = view.expect("member sees the group");
    assert!(view.is_group);
    assert_eq!(view.name.as_deref(), Some("Trip"));
    assert_eq!(view.member_count, 3);
    assert!(view.other_user.is_none());

    // Outsiders get null and an empty history, not errors.
    let Json(view) = conversations::get_conversation(
        State(state.clone()),
        Extension(dave.clone()),
        Path(group),
    )
    .await
    .unwrap();
    assert!(view.is_none());
    assert!(list(&state, &dave, group).await.is_empty());

    // Sending from outside fails loudly.
    let err = messages::send_message(
        State(state.clone()),
        Path(group),
        Extension(dave.clone()),
        Json(SendMessageRequest {
            content: "let me in".into(),
            client_key: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    // Too few distinct non-creator members.
    let err = conversations::create_group(
        State(state.clone()),
        Extension(alice.clone()),
        Json(CreateGroupRequest {
            name: "Pair".into(),
            member_ids: vec![bob.sub, alice.sub],
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let err = conversations::create_group(
        State(state.clone()),
        Extension(alice.clone()),
        Json(CreateGroupRequest {
            name: "   ".into(),
            member_ids: vec![bob.sub, carol.sub],
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn direct_view_resolves_the_other_participant() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    let Json(view) = conversations::get_conversation(
        State(state.clone()),
        Extension(alice.clone()),
        Path(conversation),
    )
    .await
    .unwrap();
    let view = view.unwrap();
    assert!(!view.is_group);
    assert_eq!(view.member_count, 2);
    assert_eq!(view.other_user.as_ref().map(|u| u.id), Some(bob.sub));

    // The same conversation looks back at Bob with Alice's face.
    let Json(view) = conversations::get_conversation(
        State(state.clone()),
        Extension(bob.clone()),
        Path(conversation),
    )
    .await
    .unwrap();
    assert_eq!(view.unwrap().other_user.map(|u| u.id), Some(alice.sub));
}

#[tokio::test]
async fn deleted_messages_withhold_content() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    let sent = send(&state, &alice, conversation, "oops").await;

    // Only the author can delete.
    let Json(resp) = messages::delete_message(
        State(state.clone()),
        Path((conversation, sent.id)),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert!(!resp.deleted);

    let Json(resp) = messages::delete_message(
        State(state.clone()),
        Path((conversation, sent.id)),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert!(resp.deleted);

    let listed = list(&state, &bob, conversation).await;
    assert!(listed[0].is_deleted);
    assert_eq!(listed[0].content, None);

    // The serialized form omits the key entirely.
    let value = serde_json::to_value(&listed[0]).unwrap();
    assert!(value.get("content").is_none());
    assert_eq!(value["is_deleted"], serde_json::Value::Bool(true));

    // Repeat deletion is a no-op.
    let Json(resp) = messages::delete_message(
        State(state.clone()),
        Path((conversation, sent.id)),
        Extension(alice.clone()),
    )
    .await
    .unwrap();
    assert!(!resp.deleted);
}

#[tokio::test]
async fn unread_counts_and_mark_read() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    send(&state, &alice, conversation, "one").await;
    send(&state, &alice, conversation, "two").await;
    send(&state, &bob, conversation, "three").await;

    let Json(summaries) =
        conversations::list_conversations(State(state.clone()), Extension(bob.clone()))
            .await
            .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].unread_count, 2);
    assert_eq!(summaries[0].member_count, 2);

    let (_, mut alice_rx) = state.dispatcher.register_user_channel(alice.sub).await;

    let Json(resp) = messages::mark_read(
        State(state.clone()),
        Path(conversation),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert_eq!(resp.marked, 2);

    // Alice's read receipt arrives.
    assert!(matches!(
        alice_rx.try_recv().unwrap(),
        GatewayEvent::ConversationRead { reader_id, marked: 2, .. } if reader_id == bob.sub
    ));

    let Json(summaries) =
        conversations::list_conversations(State(state.clone()), Extension(bob.clone()))
            .await
            .unwrap();
    assert_eq!(summaries[0].unread_count, 0);

    // Bob's own message still waits for Alice.
    let Json(summaries) =
        conversations::list_conversations(State(state.clone()), Extension(alice.clone()))
            .await
            .unwrap();
    assert_eq!(summaries[0].unread_count, 1);

    // Marking again has nothing left to do and stays quiet.
    let Json(resp) = messages::mark_read(
        State(state.clone()),
        Path(conversation),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert_eq!(resp.marked, 0);
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn typing_flows_through_endpoint_and_clears_on_send() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    let (_, mut bob_rx) = state.dispatcher.register_user_channel(bob.sub).await;

    let status = conversations::set_typing(
        State(state.clone()),
        Extension(alice.clone()),
        Path(conversation),
        Json(TypingRequest { is_typing: true }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let Json(resp) = conversations::typing_status(
        State(state.clone()),
        Extension(bob.clone()),
        Path(conversation),
    )
    .await
    .unwrap();
    assert_eq!(resp.typing, vec!["alice".to_string()]);

    // The caller never sees themselves typing.
    let Json(resp) = conversations::typing_status(
        State(state.clone()),
        Extension(alice.clone()),
        Path(conversation),
    )
    .await
    .unwrap();
    assert!(resp.typing.is_empty());

    send(&state, &alice, conversation, "here it is").await;

    let Json(resp) = conversations::typing_status(
        State(state.clone()),
        Extension(bob.clone()),
        Path(conversation),
    )
    .await
    .unwrap();
    assert!(resp.typing.is_empty());

    // Bob's event stream: started typing, the message, stopped typing.
    let event = bob_rx.try_recv().unwrap();
    let GatewayEvent::TypingStart { user_id, display_name, .. } = event else {
        panic!("expected TypingStart, got {:?}", event);
    };
    assert_eq!(user_id, alice.sub);
    assert_eq!(display_name, "alice");
    assert!(matches!(
        bob_rx.try_recv().unwrap(),
        GatewayEvent::MessageCreate { .. }
    ));
    assert!(matches!(
        bob_rx.try_recv().unwrap(),
        GatewayEvent::TypingStop { user_id, .. } if user_id == alice.sub
    ));
}

#[tokio::test]
async fn retried_send_is_deduplicated() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    let key = Uuid::new_v4();
    let request = SendMessageRequest {
        content: "did this go through?".into(),
        client_key: Some(key),
    };

    let (status, Json(first)) = messages::send_message(
        State(state.clone()),
        Path(conversation),
        Extension(alice.clone()),
        Json(SendMessageRequest {
            content: request.content.clone(),
            client_key: request.client_key,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);

    // Bob reacts before the retry lands.
    let Json(resp) = reactions::toggle_reaction(
        State(state.clone()),
        Path((conversation, first.id)),
        Extension(bob.clone()),
        Json(ToggleReactionRequest { emoji: "👍".into() }),
    )
    .await
    .unwrap();
    assert_eq!(resp.added, Some(true));

    let (status, Json(retry)) = messages::send_message(
        State(state.clone()),
        Path(conversation),
        Extension(alice.clone()),
        Json(request),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retry.id, first.id);

    // The replayed view reflects everything the message gathered since.
    assert_eq!(retry.reactions.len(), 1);
    assert_eq!(retry.reactions[0].emoji, "👍");
    assert_eq!(retry.reactions[0].user_ids, vec![bob.sub]);

    assert_eq!(list(&state, &bob, conversation).await.len(), 1);
}

#[tokio::test]
async fn pagination_windows_walk_backwards() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    let bob = register_user(&state, "bob").await;
    let conversation = open_direct(&state, &alice, &bob).await;

    let mut sent = Vec::new();
    for i in 0..5 {
        sent.push(send(&state, &alice, conversation, &format!("m{i}")).await);
    }

    let Json(page) = messages::get_messages(
        State(state.clone()),
        Path(conversation),
        Query(MessageQuery {
            limit: Some(2),
            before: None,
        }),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, sent[3].id);
    assert_eq!(page[1].id, sent[4].id);

    let Json(page) = messages::get_messages(
        State(state.clone()),
        Path(conversation),
        Query(MessageQuery {
            limit: Some(2),
            before: Some(page[0].created_at),
        }),
        Extension(bob.clone()),
    )
    .await
    .unwrap();
    assert_eq!(page[0].id, sent[1].id);
    assert_eq!(page[1].id, sent[2].id);
}

#[tokio::test]
async fn profiles_and_presence_beacons() {
    let (_dir, state) = test_state();
    let alice = register_user(&state, "alice").await;
    register_user(&state, "bob").await;

    let Json(directory) = users::list_users(State(state.clone()), Extension(alice.clone()))
        .await
        .unwrap();
    assert_eq!(directory.len(), 2);
    assert_eq!(directory[0].username, "alice");
    assert_eq!(directory[1].username, "bob");

    let Json(updated) = users::update_profile(
        State(state.clone()),
        Extension(alice.clone()),
        Json(UpdateProfileRequest {
            display_name: Some("Alice Waves".into()),
            avatar_url: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated.display_name, "Alice Waves");

    // Login verifies credentials and announces presence.
    let mut presence_rx = state.dispatcher.subscribe();
    let err = auth::login(
        State(state.clone()),
        Json(LoginRequest {
            username: "alice".into(),
            password: "wrong-password-entirely".into(),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated));

    let Json(login) = auth::login(
        State(state.clone()),
        Json(LoginRequest {
            username: "alice".into(),
            password: "correct-horse-battery".into(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(login.user_id, alice.sub);
    assert!(matches!(
        presence_rx.try_recv().unwrap(),
        GatewayEvent::PresenceUpdate { online: true, user_id, .. } if user_id == alice.sub
    ));

    let Json(profile) = users::me(State(state.clone()), Extension(alice.clone()))
        .await
        .unwrap();
    assert!(profile.is_online);
    assert_eq!(profile.display_name, "Alice Waves");

    // The tab-close beacon flips it back.
    let status = users::update_status(
        State(state.clone()),
        Extension(alice.clone()),
        Json(StatusRequest { is_online: false }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let Json(profile) = users::me(State(state.clone()), Extension(alice.clone()))
        .await
        .unwrap();
    assert!(!profile.is_online);
    assert!(profile.last_seen.is_some());
}

#[tokio::test]
async fn registration_validation() {
    let (_dir, state) = test_state();

    let err = auth::register(
        State(state.clone()),
        Json(RegisterRequest {
            username: "ab".into(),
            password: "long-enough-password".into(),
            display_name: None,
            avatar_url: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let err = auth::register(
        State(state.clone()),
        Json(RegisterRequest {
            username: "alice".into(),
            password: "short".into(),
            display_name: None,
            avatar_url: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    register_user(&state, "alice").await;
    let err = auth::register(
        State(state.clone()),
        Json(RegisterRequest {
            username: "alice".into(),
            password: "long-enough-password".into(),
            display_name: None,
            avatar_url: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}
