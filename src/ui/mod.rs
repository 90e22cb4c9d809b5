use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, InputMode};
use crate::chat::{SyncHealth, LOADING_LABEL};

pub fn draw(f: &mut Frame<'_>, app: &App) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(0),    // Main content
            Constraint::Length(3), // Input area
        ])
        .split(size);

    draw_title_bar(f, app, chunks[0]);

    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(70), // Messages
            Constraint::Percentage(30), // Session + status
        ])
        .split(chunks[1]);

    draw_chat_area(f, app, main_chunks[0]);
    draw_info_panel(f, app, main_chunks[1]);

    draw_input_area(f, app, chunks[2]);
}

fn health_label(health: SyncHealth) -> (&'static str, Color) {
    match health {
        SyncHealth::Starting => ("loading history...", Color::Yellow),
        SyncHealth::Live => ("live", Color::Green),
        SyncHealth::Degraded => ("store unreachable, retrying", Color::Red),
        SyncHealth::Stopped => ("stopped", Color::Red),
    }
}

fn draw_title_bar(f: &mut Frame, app: &App, area: Rect) {
    let (label, color) = health_label(app.health());

    let title = format!(
        " Draconic Chatroom | {} | {} ",
        app.identity.display_name(),
        label
    );

    let title_block = Block::default()
        .borders(Borders::ALL)
        .style(Style::default().fg(color))
        .title(" Draconic Chat ");

    let title_paragraph = Paragraph::new(title)
        .block(title_block)
        .alignment(Alignment::Center);

    f.render_widget(title_paragraph, area);
}

fn draw_chat_area(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(if app.scroll_offset > 0 {
            format!(" Messages (scrolled back {}) ", app.scroll_offset)
        } else {
            " Messages ".to_string()
        })
        .style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines = Vec::new();

    for message in app.get_visible_messages(inner.height as usize) {
        let timestamp = message
            .created_at
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S");
        let owner = app.sync.owner_name(message);
        let is_own = message.owner.as_ref() == Some(&app.identity.user_id);

        let owner_style = if owner == LOADING_LABEL {
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)
        } else if is_own {
            Style::default().fg(Color::Green)
        } else {
            Style::default().fg(Color::Magenta)
        };

        let mut spans = vec![
            Span::styled(format!("[{}] ", timestamp), Style::default().fg(Color::Gray)),
            Span::styled(format!("<{}> ", owner), owner_style),
        ];

        if message.is_pending() {
            spans.push(Span::styled(
                message.text.as_str(),
                Style::default().fg(Color::DarkGray),
            ));
            spans.push(Span::styled(
                " (sending...)",
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ));
        } else {
            spans.push(Span::raw(message.text.as_str()));
        }

        lines.push(Line::from(spans));
    }

    if lines.is_empty() {
        let hint_text = match app.health() {
            SyncHealth::Starting => "Loading messages...",
            _ => "No messages yet. Type a message and press Enter to send.",
        };
        lines.push(Line::from(Span::styled(
            hint_text,
            Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
        )));
    }

    let messages_widget = Paragraph::new(lines).wrap(Wrap { trim: false });

    f.render_widget(messages_widget, inner);
}

fn draw_info_panel(f: &mut Frame<'_>, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // Session info
            Constraint::Min(0),    // Status messages
        ])
        .split(area);

    let session_block = Block::default()
        .borders(Borders::ALL)
        .title(" Session ")
        .style(Style::default().fg(Color::Blue));

    let (label, color) = health_label(app.health());
    let session_text = vec![
        Line::from(vec![
            Span::raw("User: "),
            Span::styled(app.identity.display_name(), Style::default().fg(Color::Green)),
            Span::styled(
                if app.identity.is_guest { " (guest)" } else { "" },
                Style::default().fg(Color::Gray),
            ),
        ]),
        Line::from(vec![
            Span::raw("Mode: "),
            Span::styled(
                if app.offline { "offline" } else { "hosted" },
                Style::default().fg(if app.offline { Color::Yellow } else { Color::Green }),
            ),
        ]),
        Line::from(vec![
            Span::raw("Sync: "),
            Span::styled(label, Style::default().fg(color)),
            Span::styled(
                format!(" ({} pending)", app.sync.pending_count()),
                Style::default().fg(Color::Gray),
            ),
        ]),
    ];

    let session_paragraph = Paragraph::new(session_text).block(session_block);
    f.render_widget(session_paragraph, chunks[0]);

    let status_block = Block::default()
        .borders(Borders::ALL)
        .title(" Status ")
        .style(Style::default().fg(Color::Blue));

    let inner_height = status_block.inner(chunks[1]).height as usize;
    let status_lines: Vec<Line> = app
        .get_visible_status_messages(inner_height)
        .into_iter()
        .map(|line| Line::from(Span::styled(line.as_str(), Style::default().fg(Color::White))))
        .collect();

    let status_paragraph = Paragraph::new(status_lines)
        .block(status_block)
        .wrap(Wrap { trim: false });
    f.render_widget(status_paragraph, chunks[1]);
}

fn draw_input_area(f: &mut Frame, app: &App, area: Rect) {
    let input_style = match app.input_mode {
        InputMode::Normal => Style::default().fg(Color::White),
        InputMode::Editing => Style::default().fg(Color::Green),
    };

    let mode_indicator = match app.input_mode {
        InputMode::Normal => "[NORMAL] Press 'i' to type, 'q' to quit",
        InputMode::Editing => "[INPUT] ESC=normal, ENTER=send",
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .title(mode_indicator)
        .style(input_style);

    let input_text = if app.input_mode == InputMode::Editing {
        app.input.as_str()
    } else {
        ""
    };

    let input_paragraph = Paragraph::new(input_text).block(input_block);

    f.render_widget(input_paragraph, area);

    if app.input_mode == InputMode::Editing {
        f.set_cursor(area.x + app.cursor_position as u16 + 1, area.y + 1);
    }
}
