//! HTTP relay between chat clients and the upstream completion provider.
//!
//! One route, `POST /api/chat`: sanitize the supplied history, prepend the
//! tutoring instruction preamble, forward upstream, and answer either with
//! an aggregated `{"reply"}` body or a `text/event-stream` of fragments.

pub mod config;
pub mod prompt;
pub mod routes;

pub use config::RelayConfig;
pub use routes::{AppState, app};
