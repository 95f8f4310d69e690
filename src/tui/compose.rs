//! Compose box: single-line text input used for new messages and edits.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
    Frame,
};

/// State for the compose box.
#[derive(Default)]
pub struct ComposeState {
    /// Current input text.
    pub input: String,
    /// Cursor position (character offset into `input`).
    pub cursor_pos: usize,
}

impl ComposeState {
    fn char_count(&self) -> usize {
        self.input.chars().count()
    }

    /// Byte offset of the char at `pos`, or the end of the input.
    fn byte_offset(&self, pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(pos)
            .map_or(self.input.len(), |(i, _)| i)
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_offset(self.cursor_pos);
        self.input.insert(at, c);
        self.cursor_pos += 1;
    }

    /// Alt+Enter.
    pub fn insert_newline(&mut self) {
        self.insert_char('\n');
    }

    pub fn backspace(&mut self) {
        if let Some(pos) = self.cursor_pos.checked_sub(1) {
            let at = self.byte_offset(pos);
            self.input.remove(at);
            self.cursor_pos = pos;
        }
    }

    pub fn delete(&mut self) {
        if self.cursor_pos < self.char_count() {
            let at = self.byte_offset(self.cursor_pos);
            self.input.remove(at);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor_pos = (self.cursor_pos + 1).min(self.char_count());
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.char_count();
    }

    /// Ctrl+U, and after a confirmed send or edit.
    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Replace the text, cursor at the end. Used to start an edit.
    pub fn set_text(&mut self, text: &str) {
        self.input = text.to_string();
        self.move_end();
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Height of the compose box: border + input + border.
pub const COMPOSE_HEIGHT: u16 = 3;

/// What the compose box is currently for.
pub enum ComposeMode<'a> {
    /// New message into the named thread.
    Message(&'a str),
    /// Replacement text for one of our messages.
    Edit,
    /// No thread open.
    Idle,
}

/// Render the compose box into the given area.
///
/// Uses `Frame` directly so we can both write to the buffer and set cursor.
pub fn render(
    area: Rect,
    frame: &mut Frame,
    state: &ComposeState,
    mode: ComposeMode<'_>,
    focused: bool,
) {
    let border_style = match (&mode, focused) {
        (ComposeMode::Edit, _) => Style::default().fg(Color::Magenta),
        (_, true) => Style::default().fg(Color::Yellow),
        (_, false) => Style::default().fg(Color::DarkGray),
    };

    let border_type = if focused {
        BorderType::Double
    } else {
        BorderType::Plain
    };

    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style);
    if let ComposeMode::Edit = mode {
        block = block.title(" Edit message (Esc cancels) ");
    }

    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let input_area = Rect::new(inner.x, inner.y, inner.width, 1);
    let cursor_offset = render_input(input_area, frame.buffer_mut(), state, &mode);
    if focused {
        frame.set_cursor_position((input_area.x + 1 + cursor_offset, input_area.y));
    }
}

/// Draw the placeholder or the scrolled input. Returns the cursor column
/// relative to the text start.
fn render_input(area: Rect, buf: &mut Buffer, state: &ComposeState, mode: &ComposeMode<'_>) -> u16 {
    let w = area.width as usize;

    if state.input.is_empty() {
        let placeholder = match mode {
            ComposeMode::Message(title) => format!(" Message {}...", title),
            ComposeMode::Edit => " New text...".to_string(),
            ComposeMode::Idle => " Open a conversation to start chatting".to_string(),
        };
        let truncated: String = placeholder.chars().take(w).collect();
        Paragraph::new(Line::from(Span::styled(
            truncated,
            Style::default().fg(Color::DarkGray),
        )))
        .render(area, buf);
        return 0;
    }

    let display = compose_display_text(&state.input, state.cursor_pos, w);
    Paragraph::new(Line::from(Span::styled(
        format!(" {}", display.visible),
        Style::default().fg(Color::White),
    )))
    .render(area, buf);
    display.cursor_offset as u16
}

/// Information about what text to display and where the cursor is.
struct DisplayText {
    /// The visible portion of text to render.
    visible: String,
    /// The cursor offset within the visible text (in columns).
    cursor_offset: usize,
}

/// Flatten the input to one display line and scroll it so the cursor
/// stays visible. Newlines show as " | ".
fn compose_display_text(input: &str, cursor_pos: usize, width: usize) -> DisplayText {
    let mut flat: Vec<char> = Vec::with_capacity(input.len());
    let mut cursor = None;
    for (idx, ch) in input.chars().enumerate() {
        if idx == cursor_pos {
            cursor = Some(flat.len());
        }
        match ch {
            '\n' => flat.extend([' ', '|', ' ']),
            _ => flat.push(ch),
        }
    }
    let cursor = cursor.unwrap_or(flat.len());

    // One column of left margin.
    let avail = width.saturating_sub(1);
    if avail == 0 {
        return DisplayText {
            visible: String::new(),
            cursor_offset: 0,
        };
    }

    let start = if flat.len() <= avail {
        0
    } else {
        (cursor + 1).saturating_sub(avail)
    };
    DisplayText {
        visible: flat[start..].iter().take(avail).collect(),
        cursor_offset: cursor - start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(text: &str) -> ComposeState {
        let mut state = ComposeState::default();
        for c in text.chars() {
            state.insert_char(c);
        }
        state
    }

    #[test]
    fn test_insert_and_backspace_multibyte() {
        let mut state = typed("olá");
        assert_eq!(state.cursor_pos, 3);
        state.backspace();
        assert_eq!(state.input, "ol");
        state.move_home();
        state.insert_char('¡');
        assert_eq!(state.input, "¡ol");
        assert_eq!(state.cursor_pos, 1);
    }

    #[test]
    fn test_delete_and_cursor_bounds() {
        let mut state = typed("abc");
        state.move_right();
        assert_eq!(state.cursor_pos, 3);
        state.delete();
        assert_eq!(state.input, "abc");
        state.move_left();
        state.delete();
        assert_eq!(state.input, "ab");
        state.move_home();
        state.move_left();
        assert_eq!(state.cursor_pos, 0);
    }

    #[test]
    fn test_set_text_puts_cursor_at_end() {
        let mut state = ComposeState::default();
        state.set_text("Is the flat still available?");
        assert_eq!(state.cursor_pos, 28);
        state.clear();
        assert!(state.input.is_empty());
        assert_eq!(state.cursor_pos, 0);
    }

    #[test]
    fn test_display_scrolls_to_cursor() {
        let display = compose_display_text("abcdefghij", 10, 6);
        assert_eq!(display.visible, "ghij");
        assert_eq!(display.cursor_offset, 4);

        let display = compose_display_text("a\nb", 3, 20);
        assert_eq!(display.visible, "a | b");
        assert_eq!(display.cursor_offset, 5);
    }
}
