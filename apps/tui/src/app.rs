//! Core TUI application state and event loop.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chatbox_core::{
    AnswerPipeline, ChatSession, GeminiTransport, PipelineObserver, PipelineState, Rejected,
    RetryPolicy, SubmitOutcome, Transport,
};
use chatbox_shared::{AppConfig, resolve_api_key};
use color_eyre::eyre::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::screens::ChatScreen;
use crate::widgets::status_bar;

/// Latest pipeline state, written from the request task.
#[derive(Clone, Default)]
struct SharedState(Arc<Mutex<Option<PipelineState>>>);

impl SharedState {
    fn get(&self) -> Option<PipelineState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn reset(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl PipelineObserver for SharedState {
    fn state_changed(&self, state: &PipelineState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
    }
}

/// Application state.
pub(crate) struct App<T> {
    session: ChatSession<T>,
    screen: ChatScreen,
    runtime: Handle,
    completed_tx: Sender<SubmitOutcome>,
    completed_rx: Receiver<SubmitOutcome>,
    pipeline_state: SharedState,
    /// One-off notice shown in the status bar until the next key press.
    notice: Option<String>,
    /// Whether help overlay is visible.
    show_help: bool,
    /// Whether the app should quit.
    should_quit: bool,
    /// Frame counter for the "generating" animation.
    tick: usize,
}

impl<T: Transport + 'static> App<T> {
    pub(crate) fn new(session: ChatSession<T>, runtime: Handle) -> Self {
        let (completed_tx, completed_rx) = mpsc::channel();
        Self {
            session,
            screen: ChatScreen::new(),
            runtime,
            completed_tx,
            completed_rx,
            pipeline_state: SharedState::default(),
            notice: None,
            show_help: false,
            should_quit: false,
            tick: 0,
        }
    }

    /// Start a request for the current input, unless one is in flight.
    fn submit(&mut self) {
        let pending = match self.session.begin(self.screen.input()) {
            Ok(pending) => pending,
            Err(Rejected::EmptyInput) => return,
            Err(Rejected::Busy(_)) => {
                self.notice = Some("Still waiting for the previous answer…".to_string());
                return;
            }
        };

        info!(session = %self.session.id(), "submitting query");
        self.pipeline_state.reset();
        let tx = self.completed_tx.clone();
        let observer = self.pipeline_state.clone();
        self.runtime.spawn(async move {
            let outcome = pending.run(&observer).await;
            if tx.send(outcome).is_err() {
                warn!("UI closed before the answer arrived");
            }
        });
        self.screen.scroll_to_bottom();
    }

    /// Fold finished requests into the history.
    ///
    /// The input line is cleared only on success, and only if it still holds
    /// the submitted query; anything typed while waiting is kept.
    fn drain_completed(&mut self) {
        while let Ok(outcome) = self.completed_rx.try_recv() {
            self.session.complete(&outcome);
            if outcome.is_success() && self.screen.input().trim() == outcome.query.as_str() {
                self.screen.clear_input();
            }
            self.screen.scroll_to_bottom();
        }
    }

    fn status_text(&self) -> String {
        if let Some(notice) = &self.notice {
            return notice.clone();
        }
        if self.session.is_busy() {
            return match self.pipeline_state.get() {
                Some(PipelineState::Backoff { delay, .. }) => format!(
                    "Rate limited, retrying in {:.0}s…",
                    delay.as_secs_f64()
                ),
                Some(PipelineState::Attempting { attempt }) if attempt > 1 => {
                    format!("Generating answer (attempt {attempt})…")
                }
                _ => "Generating answer…".to_string(),
            };
        }
        let stats = self.session.pipeline().cache_stats();
        format!(
            "Ready — Enter to send · F1 help · Esc to quit · cached {} (hits {})",
            self.session.pipeline().cached_answers(),
            stats.hits
        )
    }
}

/// Entry point — sets up terminal, runs event loop, restores terminal.
pub(crate) fn run(config: &AppConfig, runtime: &Handle) -> Result<()> {
    let api_key = resolve_api_key(config)?;
    let transport = GeminiTransport::new(&config.gemini, api_key)?;
    let pipeline = AnswerPipeline::new(transport, RetryPolicy::from(&config.retry));
    let session = ChatSession::new(pipeline, &config.chat);

    // Setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let mut app = App::new(session, runtime.clone());
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app<T: Transport + 'static>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App<T>,
) -> Result<()> {
    loop {
        app.drain_completed();
        terminal.draw(|f| draw(f, app))?;

        // Poll for events with 100ms timeout for responsive UI
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                handle_key(app, key.code, key.modifiers);
            }
        }
        app.tick = app.tick.wrapping_add(1);

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn handle_key<T: Transport + 'static>(app: &mut App<T>, code: KeyCode, modifiers: KeyModifiers) {
    app.notice = None;

    // Global keybindings (always active)
    match code {
        KeyCode::Char('q') | KeyCode::Char('c')
            if modifiers.contains(KeyModifiers::CONTROL) =>
        {
            app.should_quit = true;
            return;
        }
        KeyCode::F(1) => {
            app.show_help = !app.show_help;
            return;
        }
        KeyCode::Esc if app.show_help => {
            app.show_help = false;
            return;
        }
        KeyCode::Esc => {
            app.should_quit = true;
            return;
        }
        _ => {}
    }

    // If help is showing, consume any key to dismiss
    if app.show_help {
        app.show_help = false;
        return;
    }

    match code {
        KeyCode::Enter => app.submit(),
        _ => app.screen.handle_key(code, modifiers),
    }
}

fn draw<T: Transport + 'static>(f: &mut Frame, app: &App<T>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Header
            Constraint::Min(1),    // Conversation + input
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    let header = Paragraph::new(vec![
        Line::from("Hello, ChatBox-Ai 🤖").style(Style::default().add_modifier(Modifier::BOLD)),
        Line::from("How can I help you?"),
    ])
    .alignment(Alignment::Center)
    .style(Style::default().fg(Color::White).bg(Color::Magenta))
    .block(Block::default().borders(Borders::BOTTOM));
    f.render_widget(header, chunks[0]);

    app.screen.draw(
        f,
        chunks[1],
        app.session.history().messages(),
        app.session.is_busy(),
        app.tick,
    );

    let bar = status_bar(&app.status_text());
    f.render_widget(bar, chunks[2]);

    if app.show_help {
        draw_help_overlay(f);
    }
}

fn draw_help_overlay(f: &mut Frame) {
    let area = centered_rect(60, 50, f.area());

    let help_text = vec![
        Line::from("Keybindings").style(Style::default().add_modifier(Modifier::BOLD)),
        Line::from(""),
        Line::from("  Enter        Send message"),
        Line::from("  ↑/↓          Scroll conversation"),
        Line::from("  PgUp/PgDn    Scroll a page"),
        Line::from("  End          Jump to latest"),
        Line::from("  F1           Toggle this help"),
        Line::from("  Esc / Ctrl-C Quit"),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help — press any key to close ")
                .style(Style::default().bg(Color::DarkGray)),
        )
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));

    // Clear background
    f.render_widget(ratatui::widgets::Clear, area);
    f.render_widget(help, area);
}

/// Create a centered rectangle with percentage width and height.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
