use coach_protocol::{ChatMessage, Fragment, Role};

/// Synthetic opening message; shown at once, sent upstream only after a real
/// user message exists.
pub const DEFAULT_GREETING: &str =
    "Hi! I'm your English Coach. Tell me what you want to practice today.";

/// Shown when a turn completes without any visible text.
const EMPTY_REPLY_PLACEHOLDER: &str = "…";

/// Identifier for one chat turn.
///
/// This changes on every submit so stale fragments can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Lifecycle status for one displayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Done,
    Streaming(TurnId),
    Error(String),
    Cancelled,
}

/// One rendered conversation line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    pub status: EntryStatus,
}

impl ChatEntry {
    pub fn new(role: Role, content: impl Into<String>, status: EntryStatus) -> Self {
        Self {
            role,
            content: content.into(),
            status,
        }
    }

    /// Empty assistant placeholder that streamed text accumulates into.
    pub fn assistant_placeholder(turn: TurnId) -> Self {
        Self::new(Role::Assistant, String::new(), EntryStatus::Streaming(turn))
    }
}

/// Per-turn state machine.
///
/// `Idle → AwaitingFirstByte → Streaming → {Completed | Errored |
/// Cancelled}`; every terminal state releases the in-flight lock.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingFirstByte(TurnId),
    Streaming(TurnId),
    Completed(TurnId),
    Errored { id: TurnId, message: String },
    Cancelled(TurnId),
}

impl TurnState {
    /// The in-flight turn, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::AwaitingFirstByte(id) | Self::Streaming(id) => Some(*id),
            Self::Idle | Self::Completed(_) | Self::Errored { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.active_turn().is_some()
    }

    /// True when a fragment for `id` may mutate the conversation.
    pub fn accepts(&self, id: TurnId) -> bool {
        self.active_turn() == Some(id)
    }
}

/// Conversation state owned by the UI controller.
///
/// All mutation goes through explicit methods; fragments from anything but
/// the active turn are ignored, so a cancelled turn can never write into the
/// conversation after the fact.
pub struct ChatSession {
    entries: Vec<ChatEntry>,
    turn_state: TurnState,
    next_turn_id: u64,
}

impl ChatSession {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            entries: vec![ChatEntry::new(Role::Assistant, greeting, EntryStatus::Done)],
            turn_state: TurnState::Idle,
            next_turn_id: 1,
        }
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn turn_state(&self) -> &TurnState {
        &self.turn_state
    }

    pub fn is_in_flight(&self) -> bool {
        self.turn_state.is_in_flight()
    }

    /// Starts a turn: cancels any in-flight turn first (at most one is ever
    /// outstanding), appends the user message plus an assistant placeholder,
    /// and returns the new turn id with the relay payload.
    ///
    /// Blank input starts nothing.
    pub fn begin_turn(&mut self, input: &str) -> Option<(TurnId, Vec<ChatMessage>)> {
        let content = input.trim();
        if content.is_empty() {
            return None;
        }

        if self.turn_state.is_in_flight() {
            self.cancel_active_turn();
        }

        let id = self.alloc_turn_id();
        self.entries
            .push(ChatEntry::new(Role::User, content, EntryStatus::Done));
        let payload = self.payload();
        self.entries.push(ChatEntry::assistant_placeholder(id));
        self.turn_state = TurnState::AwaitingFirstByte(id);

        Some((id, payload))
    }

    /// Full history with every blank entry (the placeholder included)
    /// filtered out.
    pub fn payload(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|entry| !entry.content.trim().is_empty())
            .map(|entry| ChatMessage::new(entry.role, entry.content.clone()))
            .collect()
    }

    /// Applies one fragment for `id`; returns true when the display changed.
    pub fn apply_fragment(&mut self, id: TurnId, fragment: Fragment) -> bool {
        if !self.turn_state.accepts(id) {
            // Strict turn equality keeps cancelled streams out of the UI.
            return false;
        }

        match fragment {
            Fragment::Delta { delta } => {
                self.turn_state = TurnState::Streaming(id);
                if let Some(entry) = self.placeholder_mut(id) {
                    entry.content.push_str(&delta);
                }
                true
            }
            Fragment::Done { .. } => {
                if let Some(entry) = self.placeholder_mut(id) {
                    if entry.content.trim().is_empty() {
                        entry.content = EMPTY_REPLY_PLACEHOLDER.to_string();
                    }
                    entry.status = EntryStatus::Done;
                }
                self.turn_state = TurnState::Completed(id);
                true
            }
            Fragment::Error { error } => self.fail_turn(id, error),
        }
    }

    /// Non-streaming path: replaces the placeholder with the aggregated
    /// reply in one step.
    pub fn resolve_turn(&mut self, id: TurnId, reply: impl Into<String>) -> bool {
        if !self.turn_state.accepts(id) {
            return false;
        }

        let reply = reply.into();
        if let Some(entry) = self.placeholder_mut(id) {
            entry.content = if reply.trim().is_empty() {
                EMPTY_REPLY_PLACEHOLDER.to_string()
            } else {
                reply
            };
            entry.status = EntryStatus::Done;
        }
        self.turn_state = TurnState::Completed(id);
        true
    }

    /// Fails the turn; the placeholder becomes a visible error line.
    pub fn fail_turn(&mut self, id: TurnId, message: impl Into<String>) -> bool {
        if !self.turn_state.accepts(id) {
            return false;
        }

        let message = message.into();
        if let Some(entry) = self.placeholder_mut(id) {
            entry.content = format!("Error: {message}");
            entry.status = EntryStatus::Error(message.clone());
        }
        self.turn_state = TurnState::Errored { id, message };
        true
    }

    /// Cancellation is not an error: text that already arrived stays as-is.
    pub fn cancel_active_turn(&mut self) -> Option<TurnId> {
        let id = self.turn_state.active_turn()?;
        if let Some(entry) = self.placeholder_mut(id) {
            entry.status = EntryStatus::Cancelled;
        }
        self.turn_state = TurnState::Cancelled(id);
        Some(id)
    }

    fn placeholder_mut(&mut self, id: TurnId) -> Option<&mut ChatEntry> {
        self.entries
            .iter_mut()
            .rev()
            .find(|entry| matches!(entry.status, EntryStatus::Streaming(turn) if turn == id))
    }

    fn alloc_turn_id(&mut self) -> TurnId {
        let id = TurnId::new(self.next_turn_id);
        self.next_turn_id = self.next_turn_id.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseParser;

    fn session() -> ChatSession {
        ChatSession::new(DEFAULT_GREETING)
    }

    #[test]
    fn new_session_shows_only_the_greeting() {
        let session = session();
        assert_eq!(session.entries().len(), 1);
        assert_eq!(session.entries()[0].role, Role::Assistant);
        assert_eq!(session.entries()[0].content, DEFAULT_GREETING);
        assert_eq!(*session.turn_state(), TurnState::Idle);
    }

    #[test]
    fn begin_turn_rejects_blank_input() {
        let mut session = session();
        assert!(session.begin_turn("   ").is_none());
        assert_eq!(session.entries().len(), 1);
    }

    #[test]
    fn begin_turn_sends_the_greeting_with_the_first_user_message() {
        let mut session = session();
        let (_, payload) = session.begin_turn("  hello  ").unwrap();

        assert_eq!(
            payload,
            vec![
                ChatMessage::assistant(DEFAULT_GREETING),
                ChatMessage::user("hello"),
            ]
        );
        // The empty placeholder never travels.
        assert_eq!(session.entries().len(), 3);
        assert!(session.is_in_flight());
    }

    #[test]
    fn streamed_fragments_accumulate_into_the_placeholder() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();

        assert!(session.apply_fragment(id, Fragment::delta("Hi")));
        assert_eq!(*session.turn_state(), TurnState::Streaming(id));
        assert!(session.apply_fragment(id, Fragment::delta(" there")));
        assert!(session.apply_fragment(id, Fragment::done()));

        let last = session.entries().last().unwrap();
        assert_eq!(last.content, "Hi there");
        assert_eq!(last.status, EntryStatus::Done);
        assert_eq!(*session.turn_state(), TurnState::Completed(id));
        assert!(!session.is_in_flight());
    }

    #[test]
    fn empty_completed_reply_renders_an_ellipsis() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();
        session.apply_fragment(id, Fragment::done());

        assert_eq!(session.entries().last().unwrap().content, "…");
    }

    #[test]
    fn error_fragment_replaces_the_placeholder_with_a_visible_error() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();
        session.apply_fragment(id, Fragment::delta("par"));
        session.apply_fragment(id, Fragment::error("upstream exploded"));

        let last = session.entries().last().unwrap();
        assert_eq!(last.content, "Error: upstream exploded");
        assert!(matches!(last.status, EntryStatus::Error(_)));
        assert!(!session.is_in_flight());
    }

    #[test]
    fn a_second_turn_cancels_the_first_and_rejects_its_fragments() {
        let mut session = session();
        let (first, _) = session.begin_turn("one").unwrap();
        session.apply_fragment(first, Fragment::delta("partial"));

        let (second, payload) = session.begin_turn("two").unwrap();
        assert_ne!(first, second);
        // The cancelled turn's partial text stays in the history payload.
        assert!(payload.iter().any(|message| message.content == "partial"));

        // Late fragments from the cancelled turn never render.
        assert!(!session.apply_fragment(first, Fragment::delta(" ghost")));
        assert!(!session.apply_fragment(first, Fragment::done()));

        assert!(session.apply_fragment(second, Fragment::delta("fresh")));
        let texts: Vec<&str> = session
            .entries()
            .iter()
            .map(|entry| entry.content.as_str())
            .collect();
        assert!(texts.contains(&"partial"));
        assert!(texts.contains(&"fresh"));
        assert!(!texts.iter().any(|text| text.contains("ghost")));
    }

    #[test]
    fn cancellation_is_silent() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();
        session.apply_fragment(id, Fragment::delta("keep me"));

        assert_eq!(session.cancel_active_turn(), Some(id));
        let last = session.entries().last().unwrap();
        assert_eq!(last.content, "keep me");
        assert_eq!(last.status, EntryStatus::Cancelled);
        assert_eq!(*session.turn_state(), TurnState::Cancelled(id));

        // Terminal state releases the lock; cancelling again is a no-op.
        assert_eq!(session.cancel_active_turn(), None);
        assert!(!session.is_in_flight());
    }

    #[test]
    fn resolve_turn_fills_the_placeholder_in_one_step() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();

        assert!(session.resolve_turn(id, "Full aggregated reply."));
        let last = session.entries().last().unwrap();
        assert_eq!(last.content, "Full aggregated reply.");
        assert_eq!(last.status, EntryStatus::Done);
        assert!(!session.is_in_flight());

        // Stale resolution after a terminal state changes nothing.
        assert!(!session.resolve_turn(id, "again"));
    }

    #[test]
    fn fail_turn_covers_transport_level_failures() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();

        assert!(session.fail_turn(id, "request failed: connection refused"));
        let last = session.entries().last().unwrap();
        assert!(last.content.starts_with("Error: "));
    }

    #[test]
    fn parsed_byte_stream_drives_the_session_end_to_end() {
        let mut session = session();
        let (id, _) = session.begin_turn("hello").unwrap();

        let mut parser = SseParser::new();
        let bytes =
            b":ok\n\ndata: {\"delta\":\"Hi\"}\n\ndata: {\"delta\":\" there\"}\n\ndata: {\"done\":true}\n\n";
        for chunk in bytes.chunks(7) {
            for fragment in parser.push(chunk) {
                session.apply_fragment(id, fragment);
            }
        }

        assert_eq!(session.entries().last().unwrap().content, "Hi there");
        assert_eq!(*session.turn_state(), TurnState::Completed(id));
    }
}
