//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
    Frame,
};

use super::app::{App, Pane};
use super::compose::{self, ComposeMode};
use super::messages;
use super::sidebar::{self, SidebarView};
use crate::realtime::ConnectionState;

const TITLE: &str = " SellPoint Chat";

/// Symbol and color for the realtime connection state
fn connection_indicator(state: ConnectionState) -> (&'static str, Color) {
    match state {
        ConnectionState::Connected => ("*", Color::Green),
        ConnectionState::Connecting => ("~", Color::Yellow),
        ConnectionState::Disconnected => ("o", Color::Red),
    }
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Layout: header (1 line) + main content + status bar (1 line)
    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    let [sidebar_area, content_area] =
        Layout::horizontal([Constraint::Length(30), Constraint::Fill(1)]).areas(main_area);

    let view = SidebarView {
        state: &app.sidebar,
        directory: &app.directory,
        current_user_id: &app.user_id,
        open_thread: app.open_thread_id(),
    };
    sidebar::render(
        sidebar_area,
        frame.buffer_mut(),
        &view,
        app.active_pane == Pane::Sidebar,
    );

    let [messages_area, compose_area] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
    ])
    .areas(content_area);

    messages::render(
        messages_area,
        frame.buffer_mut(),
        app.thread.as_ref(),
        &app.messages,
        app.active_pane == Pane::Messages,
    );

    let title = app.thread.as_ref().map(|t| t.title());
    let mode = match (&app.editing, &title) {
        (Some(_), _) => ComposeMode::Edit,
        (None, Some(title)) => ComposeMode::Message(title),
        (None, None) => ComposeMode::Idle,
    };
    compose::render(
        compose_area,
        frame,
        &app.compose,
        mode,
        app.active_pane == Pane::Compose,
    );

    render_status(status_area, frame.buffer_mut(), app);
}

/// Render the header bar
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = Span::styled(
        TITLE,
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );

    let (symbol, color) = connection_indicator(app.connection);
    let connection = Span::styled(
        format!(" {} {} ", symbol, app.connection.as_str()),
        Style::default().fg(color),
    );

    let user = Span::styled(format!(" {} ", app.user_id), Style::default().fg(Color::Cyan));

    // Right-align connection and user.
    let right_width = connection.width() + user.width();
    let padding_width = (area.width as usize).saturating_sub(TITLE.len() + right_width);
    let padding = Span::raw(" ".repeat(padding_width));

    let header_line = Line::from(vec![title, padding, connection, user]);

    Paragraph::new(header_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Render the status bar
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    // If there's a status message, show it prominently.
    if let Some(ref msg) = app.status_message {
        let style = if app.status_is_error {
            Style::default().fg(Color::Red).bg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Green).bg(Color::DarkGray)
        };
        let line = Line::from(Span::styled(format!(" {} ", msg), style));
        Paragraph::new(line)
            .style(Style::default().bg(Color::DarkGray))
            .render(area, buf);
        return;
    }

    let sep_style = Style::default().fg(Color::DarkGray);
    let hint_style = Style::default().fg(Color::Gray);

    let (symbol, color) = connection_indicator(app.connection);
    let connection = Span::styled(
        format!(" {} {} ", symbol, app.connection.as_str()),
        Style::default().fg(color),
    );

    let filter = Span::styled(
        format!("type: {}", app.directory.filter()),
        Style::default().fg(Color::Yellow),
    );

    let pane = Span::styled(
        format!("Tab: {} ", app.active_pane.as_str()),
        Style::default().fg(Color::Cyan),
    );

    let hints = match app.active_pane {
        Pane::Sidebar => "Enter: open  /: search  t: type  r: reload  q: quit",
        Pane::Messages => "j/k: move  e: edit  dd: delete  Esc: back",
        Pane::Compose if app.sending => "sending...",
        Pane::Compose => "Enter: send  Alt-Enter: newline  C-u: clear",
    };

    let status_line = Line::from(vec![
        connection,
        Span::styled(" | ", sep_style),
        filter,
        Span::styled(" | ", sep_style),
        pane,
        Span::styled(" | ", sep_style),
        Span::styled(hints, hint_style),
    ]);

    Paragraph::new(status_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
