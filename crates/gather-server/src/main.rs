use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use gather_api::state::{AppState, AppStateInner};
use gather_api::{conversations, messages, reactions};
use gather_gateway::connection;
use gather_gateway::dispatcher::Dispatcher;
use gather_gateway::router::MessageRouter;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    dispatcher: Dispatcher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gather=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("GATHER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("GATHER_DB_PATH").unwrap_or_else(|_| "gather.db".into());
    let host = std::env::var("GATHER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("GATHER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(gather_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let router = MessageRouter::new(db.clone(), dispatcher.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        router,
        jwt_secret,
    });

    let state = ServerState {
        app: app_state.clone(),
        dispatcher,
    };

    // Routes
    let protected_routes = Router::new()
        .route("/rooms/{room_id}/messages", get(messages::get_room_messages))
        .route("/rooms/{room_id}/messages", post(messages::send_room_message))
        .route("/direct/{peer_id}/messages", get(messages::get_direct_messages))
        .route("/direct/{peer_id}/messages", post(messages::send_direct_message))
        .route("/direct/conversations", get(conversations::direct_conversations))
        .route("/me/rooms", get(conversations::my_rooms))
        .route(
            "/messages/{kind}/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route("/messages/{kind}/{message_id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            gather_api::middleware::require_auth,
        ))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Gather server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher,
            state.app.router.clone(),
            state.app.jwt_secret.clone(),
        )
    })
}
