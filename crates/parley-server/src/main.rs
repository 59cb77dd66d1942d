use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::{conversations, messages, reactions, users};
use parley_db::Database;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::typing::{TypingTracker, run_sweep_loop};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Clone)]
struct ServerState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    typing: TypingTracker,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("PARLEY_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: PARLEY_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it to a random string in your .env file and restart.");
        std::process::exit(1);
    }

    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let typing = TypingTracker::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        typing: typing.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        typing: typing.clone(),
        jwt_secret,
    };

    // Expired typing flags become TypingStop events for the members.
    tokio::spawn(run_sweep_loop(typing, db, dispatcher));

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/me", get(users::me))
        .route("/users/me", put(users::update_profile))
        .route("/users/me/status", put(users::update_status))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::create_direct))
        .route("/conversations/direct/{user_id}", get(conversations::find_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route("/conversations/{conversation_id}/typing", get(conversations::typing_status))
        .route("/conversations/{conversation_id}/typing", put(conversations::set_typing))
        .route("/conversations/{conversation_id}/read", put(messages::mark_read))
        .route("/conversations/{conversation_id}/messages", get(messages::get_messages))
        .route("/conversations/{conversation_id}/messages", post(messages::send_message))
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher,
            state.typing,
            state.db,
            state.jwt_secret,
        )
    })
}
