//! The five routes of §6: `GET /`, `POST /clear`, `POST /chat`,
//! `GET /agent-stream`, `GET /healthz`.

use std::convert::Infallible;

use async_stream::stream;
use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::cookies;
use crate::error::Result;
use crate::runtime::{run_turn, TurnEvent};
use crate::state::AppState;

use super::ui;

fn cookie_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::COOKIE).and_then(|v| v.to_str().ok())
}

/// Resolve the request's user id, minting and signing a fresh one if
/// absent or invalid. Returns the id plus an optional `Set-Cookie` header
/// to attach to the response.
fn resolve_user(state: &AppState, headers: &HeaderMap) -> (String, Option<HeaderValue>) {
    let (id, set) = cookies::resolve_or_mint(&state.config.server.session_secret, cookie_header(headers));
    let header = set.and_then(|v| HeaderValue::from_str(&v).ok());
    (id, header)
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// `GET /` (§6): mints or reuses the user's cookie, clears their
/// conversation, and schedules a fresh sandbox. Returns the initial shell
/// naming the four stable DOM containers.
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let (user_id, cookie) = resolve_user(&state, &headers);
    state.sessions.session_start(&user_id).await?;

    let body = Json(serde_json::json!({
        "containers": [ui::CHAT_CONTAINER, ui::TRACE_CONTAINER, ui::RESPONSE_AREA, ui::TOKEN_COUNT],
    }));
    Ok(with_cookie(body.into_response(), cookie))
}

/// `POST /clear` (§6): clears messages, resets the sandbox, and schedules
/// a fresh one — same effect as `GET /`, without re-minting the cookie.
pub async fn clear(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let (user_id, cookie) = resolve_user(&state, &headers);
    state.sessions.session_start(&user_id).await?;

    let body = Json(serde_json::json!({ "cleared": true }));
    Ok(with_cookie(body.into_response(), cookie))
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
}

/// `POST /chat` (§6): appends the user's message (a no-op on empty or
/// whitespace-only input) and returns the three fragments the client
/// renders immediately, ahead of the agent loop's own events.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Result<Response> {
    let (user_id, cookie) = resolve_user(&state, &headers);

    if form.message.trim().is_empty() {
        return Ok(with_cookie(Json(serde_json::json!({ "fragments": [] })).into_response(), cookie));
    }

    state
        .sessions
        .ensure_system_prompt(&user_id, crate::runtime::SYSTEM_PROMPT);
    state
        .sessions
        .append_message(&user_id, sa_domain::message::Message::user(form.message.clone()));

    let fragments = vec![
        ui::user_bubble(&form.message),
        ui::subscribe_placeholder(),
        ui::trace_pending(),
    ];
    let body = Json(serde_json::json!({ "fragments": fragments }));
    Ok(with_cookie(body.into_response(), cookie))
}

/// Releases the per-user cancel token when the SSE stream's generator is
/// dropped — whether it finished normally or the client disconnected
/// mid-turn.
struct CancelGuard {
    cancel_map: std::sync::Arc<crate::runtime::cancel::CancelMap>,
    user_id: String,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.cancel_map.remove(&self.user_id);
    }
}

/// `GET /agent-stream` (§6): runs one turn for the cookie's user and
/// streams its events as UI fragments under a single `AgentEvent` SSE
/// event name, closing with an explicit `close` event.
pub async fn agent_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (user_id, _cookie) = resolve_user(&state, &headers);

    let stream = stream! {
        let permit = match state.session_locks.acquire(&user_id).await {
            Ok(p) => p,
            Err(_) => {
                yield Ok(Event::default().event("AgentEvent").data(
                    serde_json::json!({ "target": ui::RESPONSE_AREA, "kind": "busy", "payload": {} }).to_string(),
                ));
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                yield Ok(Event::default().event("AgentEvent").data(
                    serde_json::to_string(&ui::close_fragment()).unwrap_or_default(),
                ));
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                return;
            }
        };
        let _permit = permit;

        let cancel = state.cancel_map.register(&user_id);
        let _guard = CancelGuard { cancel_map: state.cancel_map.clone(), user_id: user_id.clone() };

        let mut events = Box::pin(run_turn(state.clone(), user_id.clone(), cancel));
        while let Some(event) = events.next().await {
            let fragments: Vec<ui::Fragment> = match &event {
                TurnEvent::Message(m) => ui::fragments_for_message(m),
                TurnEvent::Usage(u) => vec![ui::fragment_for_usage(u)],
            };
            for fragment in fragments {
                yield Ok(Event::default()
                    .event("AgentEvent")
                    .data(serde_json::to_string(&fragment).unwrap_or_default()));
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        yield Ok(Event::default()
            .event("AgentEvent")
            .data(serde_json::to_string(&ui::close_fragment()).unwrap_or_default()));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `GET /healthz`: liveness only, no session or sandbox touched.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
