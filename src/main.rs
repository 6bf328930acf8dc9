mod cli;
mod groq_client;
mod secrets;
mod sse;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_print::ceprintln;
use crossterm::tty::IsTty;
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::settings::{ChatSettings, Model};
use crate::cli::chat::{ChatContext, ChatInput};
use crate::groq_client::{DEFAULT_BASE_URL, GroqClient, RetryPolicy};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat(ChatArgs),
    /// List the available models
    Models,
}

#[derive(Args, Clone)]
struct ChatArgs {
    /// Input to send to the chat
    #[arg(short, long, conflicts_with = "image")]
    input: Option<String>,

    /// Extract text from an image and send it to the chat
    #[arg(long)]
    image: Option<PathBuf>,

    /// Model to chat with
    #[arg(short, long, env = "GROQ_MODEL", value_enum, default_value_t = Model::default())]
    model: Model,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(short, long, default_value_t = 0.7)]
    temperature: f32,

    /// Maximum number of tokens in a response
    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,

    /// Number of trailing messages sent with each request
    #[arg(short, long, default_value_t = 10)]
    window: usize,

    /// Wait for the whole response instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Retries for rate limits and server errors
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "GROQ_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// System prompt sent ahead of the conversation
    #[arg(long)]
    system: Option<String>,

    /// Secrets file holding the API key
    #[arg(long)]
    secrets: Option<PathBuf>,
}

impl ChatArgs {
    fn settings(&self) -> ChatSettings {
        ChatSettings {
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            window: self.window,
            stream: !self.no_stream,
            retries: self.retries,
            system_prompt: self.system.clone(),
        }
    }

    fn chat_input(&self) -> Option<ChatInput> {
        match (&self.input, &self.image) {
            (Some(text), _) => Some(ChatInput::Text(text.clone())),
            (None, Some(path)) => Some(ChatInput::Image(path.clone())),
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Groq Chat CLI");

    match cli.command {
        Some(Commands::Models) => {
            for model in Model::value_variants() {
                println!("{:<20} {}", model.id(), model.label());
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Chat(args)) => run_chat(args).await,
        // Default to chat if no subcommand is provided
        None => run_chat(cli.chat).await,
    }
}

async fn run_chat(args: ChatArgs) -> Result<ExitCode> {
    let settings = args.settings();
    if let Err(e) = settings.validate() {
        ceprintln!("<red>{}</red>", e);
        return Ok(ExitCode::FAILURE);
    }

    let secrets_path = args.secrets.clone().or_else(secrets::default_secrets_path);
    let api_key = match secrets::resolve_api_key(secrets_path.as_deref()) {
        Ok(key) => key,
        Err(e) => {
            ceprintln!("<red>{}</red>", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut client = GroqClient::new(api_key)?
        .with_base_url(&args.base_url)?
        .with_retry(RetryPolicy::with_retries(settings.retries));
    if let Some(secs) = args.timeout_secs {
        client = client.with_timeout(Duration::from_secs(secs))?;
    }
    info!(endpoint = %client.endpoint(), model = %settings.model, "Client ready");

    let input = args.chat_input();
    let interactive = io::stdout().is_tty();

    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        input,
        interactive,
        settings,
        Box::new(client),
    );
    chat_context.run().await
}
