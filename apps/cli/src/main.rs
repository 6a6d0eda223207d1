//! ChatBox CLI — terminal chat with a Gemini model.
//!
//! Sends questions to the Gemini `generateContent` API, retrying on rate
//! limits and caching answers for the session.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
