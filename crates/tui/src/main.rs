use anyhow::Result;
use coach_client::{DEFAULT_RELAY_URL, RelayClient};

mod app;
mod tui;
mod ui;

use app::{App, TurnProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let relay_url =
        std::env::var("COACH_RELAY_URL").unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, App::new(RelayClient::new(relay_url))).await;
    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, mut app: App) -> Result<()> {
    let mut events = tui::EventHandler::new();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(tui::AppEvent::Key(key)) => app.handle_key(key),
                Some(tui::AppEvent::Resize) => app.scroll_to_bottom(),
                Some(tui::AppEvent::Tick) => app.tick(),
                None => break,
            },
            progress = next_turn_progress(&mut app.active_turn) => match progress {
                TurnProgress::Fragment(id, fragment) => app.on_fragment(id, fragment),
                TurnProgress::Closed(id) => app.on_stream_closed(id),
            },
        }
    }

    Ok(())
}

/// Polls the in-flight turn, or parks forever while the session is idle so
/// the select! loop only wakes on terminal input.
async fn next_turn_progress(active: &mut Option<app::ActiveTurn>) -> TurnProgress {
    match active {
        Some(turn) => match turn.events.recv().await {
            Some(fragment) => TurnProgress::Fragment(turn.id, fragment),
            None => TurnProgress::Closed(turn.id),
        },
        None => std::future::pending().await,
    }
}
