//! HTTP surface: index page, static assets and the websocket route

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use futures::{SinkExt, StreamExt, future};
use parley_session::{
    CompletionOrchestrator, ProtocolConfig, SessionId, SessionProtocol, SessionStore,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Cookie carrying the session identity
pub const SESSION_COOKIE: &str = "parley_session";

/// Shared per-server dependencies, cloned into each handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CompletionOrchestrator,
    pub store: Arc<dyn SessionStore>,
    pub protocol: ProtocolConfig,
    pub static_dir: PathBuf,
    /// Lifetime of the session cookie
    pub session_max_age: time::Duration,
}

pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.static_dir);
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .nest_service("/static", assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / - serve the chat page, issuing a session cookie on first visit
async fn index(State(state): State<AppState>, jar: CookieJar) -> Response {
    let path = state.static_dir.join("index.html");
    let page = match tokio::fs::read_to_string(&path).await {
        Ok(page) => page,
        Err(e) => {
            tracing::error!("failed to read {}: {}", path.display(), e);
            return (StatusCode::NOT_FOUND, "index.html not found").into_response();
        }
    };

    if jar.get(SESSION_COOKIE).is_some() {
        return Html(page).into_response();
    }

    let id = SessionId::new();
    tracing::debug!(session = %id, "issuing session cookie");
    let cookie = Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(state.session_max_age);
    (jar.add(cookie), Html(page)).into_response()
}

/// GET /ws - upgrade and hand the socket to a session protocol
async fn ws_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let id = match jar.get(SESSION_COOKIE) {
        Some(cookie) => SessionId::from(cookie.value()),
        None => {
            let id = SessionId::new();
            tracing::debug!(session = %id, "no session cookie, using ephemeral session");
            id
        }
    };

    ws.on_upgrade(move |socket| {
        let span = tracing::info_span!("session", id = %id);
        handle_socket(socket, state, id).instrument(span)
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, id: SessionId) {
    tracing::info!("websocket connected");
    let (sender, receiver) = socket.split();

    // Close frames end the inbound stream; transport ping/pong is answered by axum
    let inbound = Box::pin(
        receiver
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
                    Err(e) => Some(Err(e)),
                })
            }),
    );
    let outbound = sender.with(|frame: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(frame.into())))
    });

    let protocol = SessionProtocol::new(id, state.orchestrator, state.store, state.protocol);
    match protocol.run(inbound, outbound).await {
        Ok(()) => tracing::info!("websocket closed"),
        Err(e) => tracing::warn!("websocket closed: {}", e),
    }
}
