//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::PathBuf;

use chatbox_core::{
    AnswerPipeline, ChatSession, GeminiTransport, PipelineObserver, PipelineState, Rejected,
    RetryPolicy,
};
use chatbox_shared::{AppConfig, Role, init_config, load_config, load_config_from, resolve_api_key};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ChatBox — ask Gemini from the terminal.
#[derive(Parser)]
#[command(
    name = "chatbox",
    version,
    about = "Chat with a Gemini model from the terminal.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.chatbox/chatbox.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Model override (e.g. gemini-2.0-flash).
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ask a single question and print the answer.
    Ask {
        /// The question (multiple words are joined with spaces).
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Start an interactive chat (/history, /stats, /quit).
    Chat,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "chatbox=warn",
        1 => "chatbox=info",
        2 => "chatbox=debug",
        _ => "chatbox=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask { ref question } => {
            let config = resolve_config(&cli)?;
            cmd_ask(&config, &question.join(" ")).await
        }
        Command::Chat => {
            let config = resolve_config(&cli)?;
            cmd_chat(&config).await
        }
        Command::Config { ref action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => {
                let config = resolve_config(&cli)?;
                cmd_config_show(&config)
            }
        },
    }
}

/// Load the config file and apply flag overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(model) = &cli.model {
        config.gemini.model = model.clone();
    }
    Ok(config)
}

fn build_session(config: &AppConfig) -> Result<ChatSession<GeminiTransport>> {
    let api_key = resolve_api_key(config)?;
    let transport = GeminiTransport::new(&config.gemini, api_key)?;
    let pipeline = AnswerPipeline::new(transport, RetryPolicy::from(&config.retry));
    Ok(ChatSession::new(pipeline, &config.chat))
}

async fn cmd_ask(config: &AppConfig, question: &str) -> Result<()> {
    let mut session = build_session(config)?;
    info!(model = %config.gemini.model, "asking single question");

    let progress = CliProgress::new();
    let outcome = match session.submit(question, &progress).await {
        Ok(outcome) => outcome,
        Err(Rejected::EmptyInput) => return Err(eyre!("question must not be empty")),
        Err(e) => return Err(eyre!(e)),
    };
    progress.finish();

    if outcome.is_success() {
        println!("{}", outcome.reply());
        Ok(())
    } else {
        Err(eyre!("{}", outcome.reply()))
    }
}

async fn cmd_chat(config: &AppConfig) -> Result<()> {
    let mut session = build_session(config)?;
    info!(session = %session.id(), model = %config.gemini.model, "starting interactive chat");

    for message in session.history().messages() {
        print_message(message.role, &message.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/history" => {
                for message in session.history().messages() {
                    print_message(message.role, &message.text);
                }
                continue;
            }
            "/stats" => {
                let stats = session.pipeline().cache_stats();
                println!(
                    "  cached answers: {}  hits: {}  misses: {}",
                    session.pipeline().cached_answers(),
                    stats.hits,
                    stats.misses
                );
                continue;
            }
            _ => {}
        }

        let progress = CliProgress::new();
        let result = session.submit(&line, &progress).await;
        progress.finish();

        match result {
            Ok(outcome) => print_message(Role::Bot, outcome.reply()),
            Err(Rejected::EmptyInput) => {}
            Err(Rejected::Busy(_)) => println!("  (still waiting for the previous answer)"),
        }
    }

    Ok(())
}

fn print_message(role: Role, text: &str) {
    match role {
        Role::User => println!("you> {text}"),
        Role::Bot => println!("bot> {text}\n"),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner shown while a request is in flight.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl PipelineObserver for CliProgress {
    fn state_changed(&self, state: &PipelineState) {
        match state {
            PipelineState::Idle => {}
            PipelineState::Attempting { attempt: 1 } => {
                self.spinner
                    .enable_steady_tick(std::time::Duration::from_millis(80));
                self.spinner.set_message("Thinking…");
            }
            PipelineState::Attempting { attempt } => {
                self.spinner.set_message(format!("Thinking… (attempt {attempt})"));
            }
            PipelineState::Backoff { delay, .. } => {
                self.spinner.set_message(format!(
                    "Rate limited, retrying in {:.0}s",
                    delay.as_secs_f64()
                ));
            }
            PipelineState::Succeeded { .. } | PipelineState::Failed(_) => {
                self.spinner.finish_and_clear();
            }
        }
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
