use coach_client::{EntryStatus, TurnState};
use coach_protocol::Role;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::app::App;

const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

pub fn render(app: &mut App, frame: &mut Frame) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, chunks[0]);
    render_chat(app, frame, chunks[1]);
    render_input(app, frame, chunks[2]);
    render_footer(app, frame, chunks[3]);
}

fn render_header(frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(
            " English Coach ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "practice conversation, corrections and vocabulary",
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(
        Paragraph::new(title).style(Style::default().bg(Color::Black)),
        area,
    );
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");
    let inner = block.inner(area);

    // Record the usable area so scroll estimates match what is drawn.
    app.chat_height = inner.height;
    app.chat_width = inner.width;

    let mut lines: Vec<Line> = Vec::new();
    for entry in app.session.entries() {
        let (speaker, style) = match entry.role {
            Role::User => (
                "You",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Role::Assistant => (
                "Coach",
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
        };

        lines.push(Line::from(Span::styled(format!("{speaker}:"), style)));

        let content = match &entry.status {
            EntryStatus::Streaming(_) if entry.content.is_empty() => "…".to_string(),
            _ => entry.content.clone(),
        };
        let content_style = match &entry.status {
            EntryStatus::Error(_) => Style::default().fg(Color::Red),
            EntryStatus::Cancelled => Style::default().fg(Color::DarkGray),
            _ => Style::default(),
        };
        for text_line in content.lines() {
            lines.push(Line::from(Span::styled(
                text_line.to_string(),
                content_style,
            )));
        }

        lines.push(Line::default());
    }

    let chat = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let border_color = if app.session.is_in_flight() {
        Color::DarkGray
    } else {
        Color::Yellow
    };

    let input = Paragraph::new(app.input.as_str())
        .style(Style::default().fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(" Message "),
        );
    frame.render_widget(input, area);

    let cursor_x = (app.input.chars().count() as u16).min(area.width.saturating_sub(2));
    frame.set_cursor_position((area.x + 1 + cursor_x, area.y + 1));
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let status = match app.session.turn_state() {
        TurnState::AwaitingFirstByte(_) => format!(
            "waiting for reply {}",
            SPINNER_FRAMES[app.animation_frame % SPINNER_FRAMES.len()]
        ),
        TurnState::Streaming(_) => format!(
            "streaming {}",
            SPINNER_FRAMES[app.animation_frame % SPINNER_FRAMES.len()]
        ),
        TurnState::Errored { .. } => "error".to_string(),
        TurnState::Cancelled(_) => "cancelled".to_string(),
        TurnState::Idle | TurnState::Completed(_) => "ready".to_string(),
    };

    let footer = Line::from(vec![
        Span::styled(
            " Enter send · Esc cancel · Ctrl+C quit ",
            Style::default().fg(Color::White).bg(Color::DarkGray),
        ),
        Span::raw(" "),
        Span::styled(status, Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(footer), area);
}
