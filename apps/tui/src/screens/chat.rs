//! Chat screen — conversation history above, message input below.

use chatbox_shared::ChatMessage;
use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::widgets::{generating_line, message_lines};

/// Lines moved per PageUp/PageDown.
const PAGE_LINES: u16 = 10;

pub(crate) struct ChatScreen {
    input: String,
    /// Lines scrolled up from the bottom of the conversation.
    scroll_back: u16,
}

impl ChatScreen {
    pub(crate) fn new() -> Self {
        Self {
            input: String::new(),
            scroll_back: 0,
        }
    }

    pub(crate) fn input(&self) -> &str {
        &self.input
    }

    pub(crate) fn clear_input(&mut self) {
        self.input.clear();
    }

    pub(crate) fn scroll_to_bottom(&mut self) {
        self.scroll_back = 0;
    }

    pub(crate) fn draw(
        &self,
        f: &mut Frame,
        area: Rect,
        messages: &[ChatMessage],
        generating: bool,
        tick: usize,
    ) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // Conversation
                Constraint::Length(3), // Input
            ])
            .split(area);

        // Conversation
        let history_block = Block::default()
            .borders(Borders::ALL)
            .title(" Conversation ");
        let inner = history_block.inner(chunks[0]);

        let mut lines: Vec<Line> = messages
            .iter()
            .flat_map(|m| message_lines(m, inner.width as usize))
            .collect();
        if generating {
            lines.push(generating_line(tick));
        }

        let offset = scroll_offset(lines.len(), inner.height, self.scroll_back);
        let history = Paragraph::new(lines)
            .block(history_block)
            .scroll((offset, 0));
        f.render_widget(history, chunks[0]);

        // Input
        let input_block = Block::default()
            .borders(Borders::ALL)
            .title(" Message ")
            .border_style(Style::default().fg(Color::Cyan));
        let input = Paragraph::new(self.input.as_str()).block(input_block);
        f.render_widget(input, chunks[1]);

        let typed = u16::try_from(self.input.chars().count()).unwrap_or(u16::MAX);
        let cursor_x = chunks[1].x.saturating_add(1).saturating_add(typed);
        let max_x = chunks[1].right().saturating_sub(2);
        f.set_cursor_position((cursor_x.min(max_x), chunks[1].y + 1));
    }

    pub(crate) fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        match code {
            KeyCode::Char(c) if !modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.push(c);
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Up => self.scroll_back = self.scroll_back.saturating_add(1),
            KeyCode::Down => self.scroll_back = self.scroll_back.saturating_sub(1),
            KeyCode::PageUp => self.scroll_back = self.scroll_back.saturating_add(PAGE_LINES),
            KeyCode::PageDown => self.scroll_back = self.scroll_back.saturating_sub(PAGE_LINES),
            KeyCode::End => self.scroll_to_bottom(),
            _ => {}
        }
    }
}

/// Top line to show so that the bottom is visible, minus `scroll_back`.
fn scroll_offset(total_lines: usize, visible: u16, scroll_back: u16) -> u16 {
    let total = u16::try_from(total_lines).unwrap_or(u16::MAX);
    total
        .saturating_sub(visible)
        .saturating_sub(scroll_back)
}
