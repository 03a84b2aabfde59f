//! Upstream completion plumbing for the chat relay.
//!
//! [`CompletionBackend`] is the seam between the HTTP layer and the model
//! provider: a backend opens one cancellable event stream per request and
//! reports progress as [`UpstreamEvent`]s. [`RigBackend`] is the OpenAI
//! implementation.

mod provider;
mod rig_backend;

pub use provider::{
    CompletionBackend, CompletionRequest, UpstreamConfig, UpstreamError, UpstreamEvent,
    UpstreamEventStream, UpstreamMessage, UpstreamResult, UpstreamRole, UpstreamStreamHandle,
    UpstreamWorker, make_event_stream,
};
pub use rig_backend::{DEFAULT_OPENAI_MODEL, RigBackend};
