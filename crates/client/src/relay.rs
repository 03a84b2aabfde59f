use std::future::Future;
use std::pin::Pin;

use coach_protocol::{ChatMessage, ChatReply, ChatRequest, ErrorBody, Fragment};
use futures::StreamExt;
use snafu::{ResultExt, Snafu};
use tokio::sync::{mpsc, oneshot};

use crate::sse::SseParser;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";
pub const CHAT_PATH: &str = "/api/chat";

pub type RelayResult<T> = Result<T, RelayError>;
pub type TurnWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Snafu)]
pub enum RelayError {
    #[snafu(display("relay request failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("relay returned status {status}: {message}"))]
    Status { status: u16, message: String },
    #[snafu(display("relay reply could not be decoded on `{stage}`, {source}"))]
    DecodeReply {
        stage: &'static str,
        source: reqwest::Error,
    },
}

/// Receiving half of one relay turn.
///
/// Dropping the stream cancels the turn; the worker stops transport IO and
/// emits nothing further.
pub struct TurnEventStream {
    events: mpsc::UnboundedReceiver<Fragment>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl TurnEventStream {
    fn new(events: mpsc::UnboundedReceiver<Fragment>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<Fragment> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for TurnEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// A turn stream plus the worker future that feeds it; the caller decides
/// where the worker runs.
pub struct TurnStreamHandle {
    pub events: TurnEventStream,
    pub worker: TurnWorker,
}

/// HTTP transport to the relay.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    chat_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            http: reqwest::Client::new(),
            chat_url: format!("{}{}", base.trim_end_matches('/'), CHAT_PATH),
        }
    }

    /// Opens one streaming turn carrying the full history.
    ///
    /// Transport problems and non-2xx responses surface as an in-stream
    /// `error` fragment so the consumer has a single code path.
    pub fn stream_chat(&self, messages: Vec<ChatMessage>) -> TurnStreamHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let worker: TurnWorker = Box::pin(run_stream_worker(
            self.http.clone(),
            self.chat_url.clone(),
            messages,
            event_tx,
            cancel_rx,
        ));

        TurnStreamHandle {
            events: TurnEventStream::new(event_rx, cancel_tx),
            worker,
        }
    }

    /// Aggregated mode: one request, one `{"reply"}` body.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> RelayResult<String> {
        let response = self
            .http
            .post(&self.chat_url)
            .json(&ChatRequest::aggregated(messages))
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-complete",
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = decode_error_body(response).await;
            return StatusSnafu {
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        let reply: ChatReply = response.json().await.context(DecodeReplySnafu {
            stage: "decode-reply",
        })?;
        Ok(reply.reply)
    }
}

async fn run_stream_worker(
    http: reqwest::Client,
    chat_url: String,
    messages: Vec<ChatMessage>,
    event_tx: mpsc::UnboundedSender<Fragment>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let send = http
        .post(&chat_url)
        .json(&ChatRequest::streaming(messages))
        .send();

    let response = tokio::select! {
        _ = &mut cancel_rx => {
            tracing::debug!("turn cancelled before the relay answered");
            return;
        }
        result = send => match result {
            Ok(response) => response,
            Err(error) => {
                let _ = event_tx.send(Fragment::error(format!("request failed: {error}")));
                return;
            }
        }
    };

    let status = response.status();
    if !status.is_success() {
        let message = decode_error_body(response).await;
        let _ = event_tx.send(Fragment::error(message));
        return;
    }

    let mut parser = SseParser::new();
    let mut bytes = response.bytes_stream();

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                // Dropping the byte stream aborts the in-flight request.
                tracing::debug!("turn stream cancelled");
                return;
            }
            chunk = bytes.next() => match chunk {
                Some(Ok(chunk)) => {
                    for fragment in parser.push(&chunk) {
                        let terminal = fragment.is_terminal();
                        if event_tx.send(fragment).is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                }
                Some(Err(error)) => {
                    let _ = event_tx.send(Fragment::error(format!("stream failed: {error}")));
                    return;
                }
                None => {
                    // The relay always terminates explicitly; a silent close
                    // means the transport was truncated.
                    let _ = event_tx.send(Fragment::error(
                        "stream ended before a terminal fragment".to_string(),
                    ));
                    return;
                }
            }
        }
    }
}

async fn decode_error_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) => serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or_else(|_| format!("relay error ({status})")),
        Err(_) => format!("relay error ({status})"),
    }
}
