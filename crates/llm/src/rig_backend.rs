use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionBackend, CompletionRequest, CompletionsFailedSnafu, EmptyMessageSetSnafu,
    HttpClientSnafu, MissingApiKeySnafu, UpstreamConfig, UpstreamError, UpstreamEvent,
    UpstreamResult, UpstreamRole, UpstreamStreamHandle, UpstreamWorker, make_event_stream,
};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// OpenAI backend built on Rig's Responses API streaming client.
#[derive(Debug)]
pub struct RigBackend {
    config: UpstreamConfig,
}

impl RigBackend {
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-backend-new",
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &UpstreamConfig) -> UpstreamResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &super::provider::UpstreamMessage) -> Option<RigMessage> {
        match message.role {
            UpstreamRole::System => None,
            UpstreamRole::User => Some(RigMessage::user(message.content.clone())),
            UpstreamRole::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    /// Rig exposes a single preamble field, so every system-role entry is
    /// folded into it while user/assistant turns travel as chat messages.
    fn merged_preamble(request: &CompletionRequest) -> Option<String> {
        let preamble_parts = request
            .messages
            .iter()
            .filter(|message| matches!(message.role, UpstreamRole::System))
            .map(|message| message.content.trim())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>();

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn open_stream(
        config: &UpstreamConfig,
        request: &CompletionRequest,
    ) -> UpstreamResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        if messages.is_empty() {
            tracing::warn!(
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-filter-messages",
            }
            .fail();
        }

        let Some(prompt) = messages.pop() else {
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        if let Some(max_output_tokens) = request.max_output_tokens {
            builder = builder.max_tokens(max_output_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<UpstreamEvent>, error: UpstreamError) {
        let _ = event_tx.send(UpstreamEvent::Error(error.to_string()));
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<UpstreamEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(UpstreamEvent::Delta(text.text)),
            // The relay wire format has no reasoning channel; thinking
            // fragments and tool traffic are not forwarded.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker(
        config: UpstreamConfig,
        request: CompletionRequest,
        event_tx: mpsc::UnboundedSender<UpstreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut stream = match Self::open_stream(&config, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open upstream stream"
                );
                Self::emit_error_event(&event_tx, error);
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    // Cancel the upstream Rig stream so provider IO stops promptly.
                    tracing::debug!("upstream stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(event) = Self::map_stream_item(item)
                                && event_tx.send(event).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                error = %source,
                                "upstream stream emitted an error chunk"
                            );
                            let error = UpstreamError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // Silent end-of-stream counts as completion; only an explicit chunk
        // error or a cancellation suppresses the Done event.
        if !cancelled && !stream_failed {
            let _ = event_tx.send(UpstreamEvent::Done);
        }
    }
}

impl CompletionBackend for RigBackend {
    fn name(&self) -> &str {
        "OpenAI (Rig)"
    }

    fn default_model(&self) -> &str {
        DEFAULT_OPENAI_MODEL
    }

    fn stream_completion(&self, request: CompletionRequest) -> UpstreamResult<UpstreamStreamHandle> {
        ensure!(
            request
                .messages
                .iter()
                .any(|message| !matches!(message.role, UpstreamRole::System)),
            EmptyMessageSetSnafu {
                stage: "stream-completion",
            }
        );

        let (event_tx, events, cancel_rx) = make_event_stream();
        let worker: UpstreamWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(UpstreamStreamHandle { events, worker })
    }
}
