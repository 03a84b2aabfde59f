use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

/// Connection settings for one upstream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub endpoint: String,
}

impl UpstreamConfig {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

/// Speaker role on the upstream interface.
///
/// `System` entries never reach the provider as chat turns; they are folded
/// into the single instruction preamble the provider accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamMessage {
    pub role: UpstreamRole,
    pub content: String,
}

impl UpstreamMessage {
    pub fn new(role: UpstreamRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(UpstreamRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(UpstreamRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(UpstreamRole::Assistant, content)
    }
}

/// One completion call as handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model_id: String,
    pub messages: Vec<UpstreamMessage>,
    pub max_output_tokens: Option<u64>,
}

impl CompletionRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<UpstreamMessage>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            max_output_tokens: None,
        }
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u64) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Incremental progress of one upstream completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Delta(String),
    Done,
    Error(String),
}

pub type UpstreamWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UpstreamError {
    #[snafu(display("missing API key for upstream provider"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("completion request has no user/assistant messages"))]
    EmptyMessageSet { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Receiving half of one completion stream.
///
/// Dropping the stream cancels the in-flight upstream call; the worker
/// observes the oneshot and stops provider IO promptly.
pub struct UpstreamEventStream {
    events: mpsc::UnboundedReceiver<UpstreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// A stream plus the worker future that feeds it.
///
/// The caller decides where the worker runs; nothing is spawned here.
pub struct UpstreamStreamHandle {
    pub events: UpstreamEventStream,
    pub worker: UpstreamWorker,
}

impl std::fmt::Debug for UpstreamStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStreamHandle")
            .field("events", &"UpstreamEventStream")
            .field("worker", &"UpstreamWorker")
            .finish()
    }
}

impl UpstreamEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<UpstreamEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for UpstreamEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Backend seam between the relay and a concrete model provider.
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn stream_completion(&self, request: CompletionRequest) -> UpstreamResult<UpstreamStreamHandle>;
}

pub fn make_event_stream() -> (
    mpsc::UnboundedSender<UpstreamEvent>,
    UpstreamEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        UpstreamEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_max_output_tokens_sets_the_cap() {
        let request = CompletionRequest::new("gpt-5", vec![UpstreamMessage::user("hello")])
            .with_max_output_tokens(400);
        assert_eq!(request.max_output_tokens, Some(400));
    }

    #[tokio::test]
    async fn dropping_the_stream_signals_cancellation() {
        let (_event_tx, events, cancel_rx) = make_event_stream();
        drop(events);
        assert!(cancel_rx.await.is_ok());
    }

    #[tokio::test]
    async fn explicit_cancel_fires_once() {
        let (_event_tx, mut events, mut cancel_rx) = make_event_stream();
        assert!(events.cancel());
        assert!(!events.cancel());
        assert!(cancel_rx.try_recv().is_ok());
    }
}
