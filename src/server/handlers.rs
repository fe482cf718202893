//! Route handlers.

use super::AppState;
use crate::error::RelayError;
use crate::observer::Route;
use crate::protocol::{ChatReply, ChatRequest, RelayEvent, StatusReport};
use crate::relay::open_relay;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use std::convert::Infallible;

pub const SERVER_NAME: &str = "chatrelay";

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/chat.html"))
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    state.observer.request_received(Route::Status, "");
    Json(StatusReport {
        server: format!("{} {}", SERVER_NAME, env!("CARGO_PKG_VERSION")),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        daemon_url: state.daemon.base_url().to_string(),
    })
}

/// `POST /chat`
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, RelayError> {
    let prompt = match validate(&state, Route::Chat, body) {
        Ok(prompt) => prompt,
        Err(err) => {
            state.observer.error_produced(Route::Chat, &err);
            return Err(err);
        }
    };

    state
        .observer
        .daemon_call_started(Route::Chat, state.daemon.base_url(), state.daemon.model());

    match state.daemon.generate(&prompt).await {
        Ok(response) => {
            state
                .observer
                .response_produced(Route::Chat, response.chars().count());
            Ok(Json(ChatReply { response }))
        }
        Err(err) => {
            state.observer.error_produced(Route::Chat, &err);
            Err(err)
        }
    }
}

/// `POST /stream_chat`
///
/// Validation failures answer 400 with a one-event stream; everything else
/// answers 200 and relays the daemon's tokens as they arrive.
pub async fn stream_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    match validate(&state, Route::StreamChat, body) {
        Ok(prompt) => {
            let events = open_relay(state.daemon.clone(), state.observer.clone(), prompt);
            sse(events).into_response()
        }
        Err(err) => {
            state.observer.error_produced(Route::StreamChat, &err);
            let status = err.status_code();
            let events = futures::stream::iter([RelayEvent::Error(err.to_string())]);
            (status, sse(events)).into_response()
        }
    }
}

/// Shared gate for both chat routes: the body must parse and carry a
/// non-empty message. Nothing is sent to the daemon otherwise.
fn validate(
    state: &AppState,
    route: Route,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<String, RelayError> {
    let Json(request) = body.map_err(|rejection| {
        state.observer.request_received(route, "");
        RelayError::InvalidBody(rejection.body_text())
    })?;
    state
        .observer
        .request_received(route, request.message.as_deref().unwrap_or_default());
    request
        .prompt()
        .map(str::to_string)
        .ok_or(RelayError::Validation)
}

fn sse<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = RelayEvent> + Send + 'static,
{
    Sse::new(events.map(|event| Ok(to_event(&event)))).keep_alive(KeepAlive::default())
}

fn to_event(event: &RelayEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data(r#"{"error":"Failed to encode event"}"#))
}
