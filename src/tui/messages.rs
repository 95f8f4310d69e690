//! Messages pane: the open thread's messages, oldest at the top.

use chrono::{DateTime, Local, Utc};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use crate::chat::ChatThread;
use crate::models::Message;

/// Selection and scroll state for the messages pane.
pub struct MessagesState {
    /// Index of the selected message.
    pub selected: usize,
    /// Vertical scroll offset (in rendered lines, 0 = top).
    pub scroll_offset: usize,
    /// Keep the newest message selected as messages arrive.
    pub follow_tail: bool,
}

impl Default for MessagesState {
    fn default() -> Self {
        Self {
            selected: 0,
            scroll_offset: 0,
            follow_tail: true,
        }
    }
}

impl MessagesState {
    pub fn select_previous(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
        self.follow_tail = false;
    }

    pub fn select_next(&mut self, count: usize) {
        if self.selected + 1 < count {
            self.selected += 1;
        }
        self.follow_tail = self.selected + 1 >= count;
    }

    /// Re-apply the selection after the message list changed.
    pub fn sync(&mut self, count: usize) {
        if count == 0 {
            self.selected = 0;
        } else if self.follow_tail || self.selected >= count {
            self.selected = count - 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the messages pane into the given area.
pub fn render(
    area: Rect,
    buf: &mut Buffer,
    thread: Option<&ChatThread>,
    state: &MessagesState,
    focused: bool,
) {
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let border_type = if focused {
        BorderType::Double
    } else {
        BorderType::Plain
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style);

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let Some(thread) = thread else {
        let line = Line::from(Span::styled(
            " Select a conversation and press Enter",
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(Rect::new(inner.x, inner.y, inner.width, 1), buf);
        return;
    };

    // Reserve the first line for the thread header.
    let header_area = Rect::new(inner.x, inner.y, inner.width, 1);
    render_thread_header(header_area, buf, &thread.title());

    let messages_area = Rect::new(
        inner.x,
        inner.y + 1,
        inner.width,
        inner.height.saturating_sub(1),
    );

    if messages_area.height == 0 {
        return;
    }

    if !thread.is_seeded() {
        let line = Line::from(Span::styled(
            " Loading...",
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(Rect::new(messages_area.x, messages_area.y, messages_area.width, 1), buf);
        return;
    }
    if thread.messages().is_empty() {
        let line = Line::from(Span::styled(
            " (no messages yet)",
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(Rect::new(messages_area.x, messages_area.y, messages_area.width, 1), buf);
        return;
    }

    let (all_lines, msg_line_ranges) =
        build_message_lines(thread, state.selected, focused, messages_area.width as usize);
    let total_lines = all_lines.len();
    let visible_height = messages_area.height as usize;

    let scroll = compute_auto_scroll(
        state.scroll_offset,
        state.selected,
        &msg_line_ranges,
        visible_height,
        total_lines,
    );

    for (row, line_idx) in (scroll..total_lines).take(visible_height).enumerate() {
        let y = messages_area.y + row as u16;
        let line_area = Rect::new(messages_area.x, y, messages_area.width, 1);
        Paragraph::new(all_lines[line_idx].clone()).render(line_area, buf);
    }

    // Scroll indicators.
    if total_lines > visible_height {
        let indicator_x = messages_area.x + messages_area.width.saturating_sub(1);
        if scroll > 0 {
            let cell = &mut buf[(indicator_x, messages_area.y)];
            cell.set_char('^');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
        if scroll + visible_height < total_lines {
            let bottom_y = messages_area.y + messages_area.height.saturating_sub(1);
            let cell = &mut buf[(indicator_x, bottom_y)];
            cell.set_char('v');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
    }
}

fn render_thread_header(area: Rect, buf: &mut Buffer, header: &str) {
    let line = Line::from(vec![Span::styled(
        format!(" {} ", header),
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    )]);
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Build the flat line buffer and per-message line ranges in a single pass.
fn build_message_lines(
    thread: &ChatThread,
    selected: usize,
    focused: bool,
    width: usize,
) -> (Vec<Line<'static>>, Vec<(usize, usize)>) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    for (idx, msg) in thread.messages().iter().enumerate() {
        let start = lines.len();
        let own = msg.is_from(thread.current_user_id());
        let marker = if focused && idx == selected { "\u{25BA}" } else { " " };

        let sender_style = if own {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(vec![
            Span::styled(marker.to_string(), Style::default().fg(Color::Yellow)),
            Span::styled(sender_name(thread, msg), sender_style),
            Span::styled(
                format!("  {}", format_timestamp(msg.created_at)),
                Style::default().fg(Color::DarkGray),
            ),
        ]));

        let body_style = if idx == selected {
            Style::default().fg(Color::White)
        } else {
            Style::default().fg(Color::Gray)
        };
        for text_line in wrap_text(&msg.text, width.saturating_sub(3)) {
            lines.push(Line::from(Span::styled(format!("   {}", text_line), body_style)));
        }

        lines.push(Line::from(""));
        ranges.push((start, lines.len()));
    }

    (lines, ranges)
}

fn sender_name(thread: &ChatThread, msg: &Message) -> String {
    if msg.is_from(thread.current_user_id()) {
        return "You".to_string();
    }
    thread
        .other_participant()
        .filter(|p| p.id == msg.from)
        .map(|p| p.display_name().to_string())
        .unwrap_or_else(|| msg.from.clone())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    let local = at.with_timezone(&Local);
    if local.date_naive() == Local::now().date_naive() {
        local.format("%H:%M").to_string()
    } else {
        local.format("%b %d %H:%M").to_string()
    }
}

/// Word-wrap by terminal columns: split on newlines first, then wrap long lines.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    use unicode_width::UnicodeWidthStr;

    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        if line.width() <= max_width {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
            } else if current.width() + 1 + word.width() <= max_width {
                current.push(' ');
                current.push_str(word);
            } else {
                result.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}

/// Compute scroll offset that keeps the selected message visible.
fn compute_auto_scroll(
    current_scroll: usize,
    selected: usize,
    ranges: &[(usize, usize)],
    visible_height: usize,
    total_lines: usize,
) -> usize {
    if ranges.is_empty() || total_lines <= visible_height {
        return 0;
    }

    let Some(&(sel_start, sel_end)) = ranges.get(selected) else {
        return current_scroll;
    };

    let mut scroll = current_scroll;

    // If the message is taller than the viewport, always show its start.
    let msg_height = sel_end.saturating_sub(sel_start);
    if msg_height >= visible_height {
        scroll = sel_start;
    } else {
        if sel_start < scroll {
            scroll = sel_start;
        }
        if sel_end > scroll + visible_height {
            scroll = sel_end.saturating_sub(visible_height);
        }
    }

    let max_scroll = total_lines.saturating_sub(visible_height);
    scroll.min(max_scroll)
}
