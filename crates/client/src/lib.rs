//! Client-side building blocks for the chat relay.
//!
//! [`SseParser`] turns raw transport chunks into typed fragments,
//! [`RelayClient`] owns the HTTP transport and hands out cancellable turn
//! streams, and [`ChatSession`] is the conversation state machine the UI
//! drives.

mod relay;
mod session;
mod sse;

pub use relay::{
    CHAT_PATH, DEFAULT_RELAY_URL, RelayClient, RelayError, RelayResult, TurnEventStream,
    TurnStreamHandle, TurnWorker,
};
pub use session::{
    ChatEntry, ChatSession, DEFAULT_GREETING, EntryStatus, TurnId, TurnState,
};
pub use sse::SseParser;
