use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response, Sse,
        sse::Event,
    },
    routing::post,
};
use coach_llm::{CompletionBackend, UpstreamEvent, UpstreamEventStream};
use coach_protocol::{ChatReply, ErrorBody, Fragment};
use futures::{Stream, StreamExt, stream};

use crate::config::RelayConfig;
use crate::prompt;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    /// `None` while no upstream credential is configured; every chat request
    /// then fails with a structured 500 before any stream is opened.
    pub backend: Option<Arc<dyn CompletionBackend>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .with_state(state)
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let request = prompt::parse_request(&body);
    let history = prompt::sanitize(request.messages);

    let Some(backend) = state.backend.clone() else {
        tracing::error!("rejecting chat request: no upstream credential is configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new("missing OPENAI_API_KEY configuration")),
        )
            .into_response();
    };

    let completion = prompt::build_completion(&state.config, &history);
    tracing::debug!(
        turns = history.len(),
        stream = request.stream,
        model = %completion.model_id,
        "forwarding conversation upstream"
    );

    match backend.stream_completion(completion) {
        Ok(handle) => {
            // The worker drives upstream IO; the handler only consumes events.
            tokio::spawn(handle.worker);
            if request.stream {
                stream_reply(handle.events).into_response()
            } else {
                aggregate_reply(handle.events).await
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "failed to open upstream completion");
            if request.stream {
                failed_stream(error.to_string()).into_response()
            } else {
                (StatusCode::BAD_GATEWAY, Json(ErrorBody::new(error.to_string()))).into_response()
            }
        }
    }
}

/// Re-frames upstream events as `data: <json>` blocks, opening with the
/// `:ok` comment so the client can start rendering before the first real
/// byte. Every path ends the stream with exactly one terminal fragment.
fn stream_reply(
    events: UpstreamEventStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let fragments = stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        let (fragment, next) = match events.recv().await {
            Some(UpstreamEvent::Delta(text)) => (Fragment::delta(text), Some(events)),
            Some(UpstreamEvent::Error(message)) => (Fragment::error(message), None),
            // A closed channel without a terminal event counts as completion.
            Some(UpstreamEvent::Done) | None => (Fragment::done(), None),
        };
        Some((Ok(fragment_event(&fragment)), next))
    });

    let opening = stream::once(async { Ok(Event::default().comment("ok")) });
    Sse::new(opening.chain(fragments))
}

/// Upstream refused before a stream existed; surface it in-stream anyway so
/// streaming clients keep a single code path.
fn failed_stream(message: String) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = vec![
        Ok(Event::default().comment("ok")),
        Ok(fragment_event(&Fragment::error(message))),
    ];
    Sse::new(stream::iter(events))
}

async fn aggregate_reply(mut events: UpstreamEventStream) -> Response {
    let mut reply = String::new();
    loop {
        match events.recv().await {
            Some(UpstreamEvent::Delta(text)) => reply.push_str(&text),
            Some(UpstreamEvent::Error(message)) => {
                return (StatusCode::BAD_GATEWAY, Json(ErrorBody::new(message))).into_response();
            }
            Some(UpstreamEvent::Done) | None => break,
        }
    }

    Json(ChatReply { reply }).into_response()
}

fn fragment_event(fragment: &Fragment) -> Event {
    let payload = serde_json::to_string(fragment)
        .unwrap_or_else(|_| r#"{"error":"fragment serialization failed"}"#.to_string());
    Event::default().data(payload)
}
