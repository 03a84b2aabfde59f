use coach_client::{ChatSession, DEFAULT_GREETING, RelayClient, TurnEventStream, TurnId};
use coach_protocol::Fragment;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Transport side of the in-flight turn; dropping `events` cancels it.
pub struct ActiveTurn {
    pub id: TurnId,
    pub events: TurnEventStream,
}

/// Outcome of polling the active turn.
pub enum TurnProgress {
    Fragment(TurnId, Fragment),
    Closed(TurnId),
}

pub struct App {
    pub session: ChatSession,
    pub relay: RelayClient,
    pub input: String,
    pub should_quit: bool,
    pub active_turn: Option<ActiveTurn>,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub animation_frame: usize,
}

impl App {
    pub fn new(relay: RelayClient) -> Self {
        Self {
            session: ChatSession::new(DEFAULT_GREETING),
            relay,
            input: String::new(),
            should_quit: false,
            active_turn: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Enter => self.submit(),
            KeyCode::Esc => self.cancel_turn(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    /// Submits the input line as a new turn.
    ///
    /// A turn still in flight is cancelled first; there is never more than
    /// one outstanding relay request.
    pub fn submit(&mut self) {
        let input = std::mem::take(&mut self.input);
        let Some((id, payload)) = self.session.begin_turn(&input) else {
            self.input = input;
            return;
        };

        self.drop_active_turn();

        let handle = self.relay.stream_chat(payload);
        tokio::spawn(handle.worker);
        self.active_turn = Some(ActiveTurn {
            id,
            events: handle.events,
        });
        self.scroll_to_bottom();
    }

    /// Esc: abandon the in-flight turn, leaving received text as-is.
    pub fn cancel_turn(&mut self) {
        if self.session.cancel_active_turn().is_some() {
            self.drop_active_turn();
        }
    }

    pub fn on_fragment(&mut self, id: TurnId, fragment: Fragment) {
        let terminal = fragment.is_terminal();
        if self.session.apply_fragment(id, fragment) {
            self.scroll_to_bottom();
        }
        if terminal {
            self.release_turn(id);
        }
    }

    /// The event channel closed without a terminal fragment.
    pub fn on_stream_closed(&mut self, id: TurnId) {
        if self.session.fail_turn(id, "stream ended before a terminal fragment") {
            self.scroll_to_bottom();
        }
        self.release_turn(id);
    }

    pub fn tick(&mut self) {
        if self.session.is_in_flight() {
            self.animation_frame = self.animation_frame.wrapping_add(1);
        }
    }

    fn drop_active_turn(&mut self) {
        if let Some(mut turn) = self.active_turn.take() {
            turn.events.cancel();
        }
    }

    fn release_turn(&mut self, id: TurnId) {
        if self
            .active_turn
            .as_ref()
            .is_some_and(|turn| turn.id == id)
        {
            self.active_turn = None;
        }
    }

    /// Keeps the newest text visible, mirroring the chat-height/width
    /// estimate the render pass records.
    pub fn scroll_to_bottom(&mut self) {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for entry in self.session.entries() {
            total_lines += 1; // speaker line
            for line in entry.content.lines() {
                // Character count, not byte length, for UTF-8 content.
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1;
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // blank separator
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}
