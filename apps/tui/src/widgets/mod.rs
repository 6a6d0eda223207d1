//! Reusable TUI widgets.

use chatbox_shared::{ChatMessage, Role};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Share of the conversation width a single bubble may use.
const BUBBLE_WIDTH_PERCENT: usize = 75;

/// Bottom status bar.
pub(crate) fn status_bar(msg: &str) -> Paragraph<'static> {
    Paragraph::new(format!(" {msg}"))
        .style(
            Style::default()
                .bg(Color::DarkGray)
                .fg(Color::White),
        )
}

/// Render one message as wrapped, aligned lines followed by a blank spacer.
///
/// Wrapping is by display width and keeps leading indentation, so code
/// blocks in answers stay readable.
pub(crate) fn message_lines(message: &ChatMessage, width: usize) -> Vec<Line<'static>> {
    let bubble_width = (width * BUBBLE_WIDTH_PERCENT / 100).max(10);
    let (style, alignment) = match message.role {
        Role::User => (
            Style::default().fg(Color::White).bg(Color::Magenta),
            Alignment::Right,
        ),
        Role::Bot => (
            Style::default().fg(Color::Black).bg(Color::LightMagenta),
            Alignment::Left,
        ),
    };

    let mut lines: Vec<Line<'static>> = textwrap::wrap(&message.text, bubble_width)
        .into_iter()
        .map(|row| Line::from(Span::styled(format!(" {row} "), style)).alignment(alignment))
        .collect();
    lines.push(Line::from(""));
    lines
}

/// Pulsing placeholder shown while an answer is being generated.
pub(crate) fn generating_line(tick: usize) -> Line<'static> {
    let dots = ".".repeat(tick / 3 % 4);
    Line::from(Span::styled(
        format!(" generating{dots:<3} "),
        Style::default()
            .fg(Color::Gray)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    ))
}
