//! HTTP + SSE serving.
//!
//! `GET /sse` opens a session: the first event (`endpoint`) tells the client
//! where to POST its messages, and replies come back as `message` events on
//! the same stream. `POST /messages/?session_id=<id>` accepts one JSON-RPC
//! message and answers `202 Accepted`; the reply travels over the stream.

use std::{
    collections::HashMap,
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::{ConnectionState, Dispatcher};

/// Path clients POST messages to.
pub const MESSAGES_PATH: &str = "/messages/";

#[derive(Debug, Clone)]
struct SseSession {
    outbound: mpsc::UnboundedSender<String>,
    connection: Arc<Mutex<ConnectionState>>,
}

type SessionMap = Arc<RwLock<HashMap<Uuid, SseSession>>>;

#[derive(Debug, Clone)]
struct SseState {
    dispatcher: Arc<Dispatcher>,
    sessions: SessionMap,
    shutdown: CancellationToken,
}

/// Removes a session when its event stream is dropped.
struct SessionGuard {
    id: Uuid,
    sessions: SessionMap,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        tracing::info!(session_id = %self.id, "SSE session closed");
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

/// Router exposing `/sse` and `/messages/`.
///
/// Open event streams end when `shutdown` is cancelled.
pub fn sse_router(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Router {
    let state = SseState {
        dispatcher,
        sessions: Arc::default(),
        shutdown,
    };
    Router::new()
        .route("/sse", get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
        .route("/messages", post(post_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve_sse(
    dispatcher: Arc<Dispatcher>,
    addr: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local: SocketAddr = listener.local_addr()?;
    tracing::info!(
        name: "server.started",
        address = %format!("http://{local}/sse"),
        "serving MCP over SSE"
    );
    let app = sse_router(dispatcher, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("SSE server stopped");
    Ok(())
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4();
    let (outbound, mut inbound) = mpsc::unbounded_channel::<String>();
    state
        .sessions
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            id,
            SseSession {
                outbound,
                connection: Arc::default(),
            },
        );
    tracing::info!(session_id = %id, "SSE session opened");

    let guard = SessionGuard {
        id,
        sessions: Arc::clone(&state.sessions),
    };
    let endpoint = format!("{MESSAGES_PATH}?session_id={}", id.simple());
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => None,
                message = inbound.recv() => message,
            };
            let Some(message) = next else { break };
            yield Ok(Event::default().event("message").data(message));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let Ok(id) = Uuid::parse_str(&query.session_id) else {
        return (StatusCode::BAD_REQUEST, "Invalid session ID").into_response();
    };
    let session = state
        .sessions
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned();
    let Some(session) = session else {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };
    if let Err(err) = serde_json::from_str::<serde_json::Value>(&body) {
        tracing::warn!(session_id = %id, error = %err, "rejecting unparseable message");
        return (StatusCode::BAD_REQUEST, "Could not parse message").into_response();
    }

    let reply = {
        let mut connection = session.connection.lock().await;
        state.dispatcher.handle_line(&mut connection, &body).await
    };
    if let Some(reply) = reply {
        if session.outbound.send(reply).is_err() {
            return (StatusCode::GONE, "Session stream has closed").into_response();
        }
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}
