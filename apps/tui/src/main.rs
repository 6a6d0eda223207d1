//! ChatBox TUI — interactive terminal chat with a Gemini model.
//!
//! A single chat screen built with `ratatui` + `crossterm`. Requests run on a
//! tokio runtime in the background while the UI keeps drawing.

mod app;
mod screens;
mod widgets;

use std::sync::Mutex;

use chatbox_shared::{ChatBoxError, config_dir, load_config};
use color_eyre::eyre::Result;

/// Log file name inside the config directory.
const LOG_FILE_NAME: &str = "chatbox-tui.log";

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing()?;

    let config = load_config()?;
    let runtime = tokio::runtime::Runtime::new()?;
    app::run(&config, runtime.handle())
}

/// Log to a file: the terminal belongs to the UI.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ChatBoxError::io(&dir, e))?;
    let path = dir.join(LOG_FILE_NAME);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ChatBoxError::io(&path, e))?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatbox=info"));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
