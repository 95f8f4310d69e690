//! Sidebar widget: conversations of the current listing filter, newest first,
//! with unread badges and an inline search line.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use crate::chat::ConversationDirectory;
use crate::models::Conversation;

/// Sidebar navigation state. The rows themselves come from the directory.
pub struct SidebarState {
    /// Index into the visible (searched, sorted) rows.
    pub selected: usize,
    /// Search text; empty shows everything.
    pub query: String,
    /// Whether keystrokes currently edit the query.
    pub searching: bool,
    /// Whether a directory fetch is in flight.
    pub loading: bool,
}

impl Default for SidebarState {
    fn default() -> Self {
        Self {
            selected: 0,
            query: String::new(),
            searching: false,
            loading: true,
        }
    }
}

impl SidebarState {
    /// Rows in display order.
    pub fn rows<'a>(
        &self,
        directory: &'a ConversationDirectory,
        current_user_id: &str,
    ) -> Vec<&'a Conversation> {
        directory.view(&self.query, current_user_id)
    }

    /// Id of the selected conversation.
    pub fn selected_id(
        &self,
        directory: &ConversationDirectory,
        current_user_id: &str,
    ) -> Option<String> {
        self.rows(directory, current_user_id)
            .get(self.selected)
            .map(|c| c.id.clone())
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self, row_count: usize) {
        if self.selected + 1 < row_count {
            self.selected += 1;
        }
    }

    /// Clamp selected index to valid range after the rows changed.
    pub fn clamp_selection(&mut self, row_count: usize) {
        if row_count == 0 {
            self.selected = 0;
        } else if self.selected >= row_count {
            self.selected = row_count - 1;
        }
    }

    pub fn push_query(&mut self, c: char) {
        self.query.push(c);
        self.selected = 0;
    }

    pub fn pop_query(&mut self) {
        self.query.pop();
        self.selected = 0;
    }

    /// Leave search mode, optionally dropping the query.
    pub fn end_search(&mut self, keep_query: bool) {
        self.searching = false;
        if !keep_query {
            self.query.clear();
            self.selected = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Everything the sidebar needs to draw one frame.
pub struct SidebarView<'a> {
    pub state: &'a SidebarState,
    pub directory: &'a ConversationDirectory,
    pub current_user_id: &'a str,
    pub open_thread: Option<&'a str>,
}

/// Render the sidebar into the given area.
pub fn render(area: Rect, buf: &mut Buffer, view: &SidebarView<'_>, focused: bool) {
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
        .border_style(border_style)
        .title(format!(" {} ", view.directory.filter()));

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    // Search line on top while searching or filtering.
    let mut list_area = inner;
    if view.state.searching || !view.state.query.is_empty() {
        let search_area = Rect::new(inner.x, inner.y, inner.width, 1);
        let style = if view.state.searching {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let cursor = if view.state.searching { "_" } else { "" };
        let text = format!("/{}{}", view.state.query, cursor);
        render_row(buf, search_area, &text, "", style, style);
        list_area = Rect::new(
            inner.x,
            inner.y + 1,
            inner.width,
            inner.height.saturating_sub(1),
        );
    }

    let rows = view.state.rows(view.directory, view.current_user_id);

    if rows.is_empty() {
        if list_area.height > 0 {
            let text = if view.state.loading {
                " Loading..."
            } else if view.state.query.is_empty() {
                " (no conversations)"
            } else {
                " (no matches)"
            };
            let row_area = Rect::new(list_area.x, list_area.y, list_area.width, 1);
            let style = Style::default().fg(Color::DarkGray);
            render_row(buf, row_area, text, "", style, style);
        }
        return;
    }

    // Two lines per conversation: title row and a dimmed detail row.
    let available = (list_area.height / 2) as usize;
    if available == 0 {
        return;
    }
    let scroll_offset = compute_scroll_offset(view.state.selected, available, rows.len());

    for (slot, idx) in (scroll_offset..rows.len()).take(available).enumerate() {
        let conv = rows[idx];
        let y = list_area.y + (slot * 2) as u16;
        let ctx = RowCtx {
            area: Rect::new(list_area.x, y, list_area.width, 2),
            selected: idx == view.state.selected,
            open: view.open_thread == Some(conv.id.as_str()),
        };
        render_conversation(buf, &ctx, conv, view.current_user_id);
    }
}

/// Simple scroll offset: keep selected item visible.
fn compute_scroll_offset(selected: usize, height: usize, total: usize) -> usize {
    if total <= height {
        return 0;
    }
    if selected < height {
        return 0;
    }
    let max_offset = total.saturating_sub(height);
    let offset = selected.saturating_sub(height - 1);
    offset.min(max_offset)
}

/// Rendering context for a single sidebar entry.
struct RowCtx {
    area: Rect,
    selected: bool,
    open: bool,
}

/// Style for a conversation title based on selection and unread state.
fn item_style(selected: bool, has_unread: bool) -> Style {
    if selected {
        Style::default()
            .fg(Color::White)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else if has_unread {
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    }
}

/// Style for a badge (unread count) based on selection state.
fn badge_style(selected: bool) -> Style {
    if selected {
        Style::default()
            .fg(Color::Yellow)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    }
}

fn render_conversation(buf: &mut Buffer, ctx: &RowCtx, conv: &Conversation, user: &str) {
    let unread = conv.unread_for(user);
    let cursor = if ctx.selected { "\u{25BA}" } else { " " };
    let marker = if ctx.open { "*" } else { " " };
    let title = conv.listing_title().unwrap_or("(untitled listing)");
    let label = format!("{}{} {}", cursor, marker, title);
    let badge = if unread > 0 {
        unread.to_string()
    } else {
        String::new()
    };

    let style = item_style(ctx.selected, unread > 0);
    let bstyle = if unread > 0 {
        badge_style(ctx.selected)
    } else {
        style
    };
    let title_area = Rect::new(ctx.area.x, ctx.area.y, ctx.area.width, 1);
    render_row(buf, title_area, &label, &badge, style, bstyle);

    if ctx.area.height < 2 {
        return;
    }
    let other = conv
        .other_participant(user)
        .map(|p| p.display_name())
        .unwrap_or("?");
    let detail = match conv.last_message.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(last) => format!("   {}: {}", other, last.trim().replace('\n', " ")),
        None => format!("   {}", other),
    };
    let detail_style = if ctx.selected {
        Style::default().fg(Color::Gray).bg(Color::DarkGray)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let detail_area = Rect::new(ctx.area.x, ctx.area.y + 1, ctx.area.width, 1);
    render_row(buf, detail_area, &detail, "", detail_style, detail_style);
}

/// Render a row with left-aligned text and an optional right-aligned badge.
fn render_row(
    buf: &mut Buffer,
    area: Rect,
    left: &str,
    badge: &str,
    text_style: Style,
    badge_style: Style,
) {
    let width = area.width as usize;
    if width == 0 {
        return;
    }

    // Truncate left text if needed, leaving room for badge + 1 space
    let badge_len = badge.len();
    let max_left = if badge_len > 0 {
        width.saturating_sub(badge_len + 1)
    } else {
        width
    };

    let left_truncated = truncate_to_width(left, max_left);
    let left_len = unicode_width::UnicodeWidthStr::width(left_truncated.as_str());

    let pad = width.saturating_sub(left_len + badge_len);

    let line = Line::from(vec![
        Span::styled(left_truncated, text_style),
        Span::styled(" ".repeat(pad), text_style),
        Span::styled(badge.to_string(), badge_style),
    ]);

    Paragraph::new(line).render(area, buf);
}

/// Longest prefix of `text` that fits in `max` terminal columns.
fn truncate_to_width(text: &str, max: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w > max {
            break;
        }
        used += w;
        out.push(ch);
    }
    out
}
