use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use tunechat::chat::{self, ChatService};
use tunechat::config::Config;
use tunechat::llm_interaction::CompletionClient;
use tunechat::playback::{LogOnlyPlayback, PlaybackTrigger, YouTubeLauncher};
use tunechat::resolver::{Resolver, ResolverInput};
use tunechat::transcript::{SessionStore, TranscriptLog};
use tunechat::web_server::{self, AppState};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

// Options shared by the commands that talk to the model
#[derive(clap::Args, Debug)]
struct ChatOptions {
    #[arg(long, env = "TUNECHAT_LOG_FILE", default_value = "logs.txt", help = "File saved transcripts are appended to.")]
    log_file: PathBuf,
    #[arg(long, env = "TUNECHAT_NO_PLAYBACK", help = "Log playback requests instead of opening a browser.")]
    no_playback: bool,
    #[arg(long, env = "TUNECHAT_OPENER", help = "Program used to open the YouTube search URL.")]
    opener: Option<String>,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat web server.
    Serve {
        #[arg(long, env = "TUNECHAT_HOST", default_value = "0.0.0.0", help = "Address to listen on.")]
        host: IpAddr,
        #[arg(long, env = "TUNECHAT_PORT", default_value_t = 5000, help = "Port for the web server.")]
        port: u16,
        #[arg(long, env = "TUNECHAT_TEMPLATES", default_value = "templates", help = "Directory holding index.html.")]
        templates: PathBuf,
        #[arg(long, env = "TUNECHAT_STATIC_DIR", default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
        #[command(flatten)]
        options: ChatOptions,
    },
    /// Chat with the bot in the terminal.
    Chat {
        #[command(flatten)]
        options: ChatOptions,
    },
    /// Show what the resolver decides for a message and a reply, without calling the model.
    Resolve {
        #[arg(long, help = "The user's message.")]
        user: String,
        #[arg(long, help = "The model's reply.")]
        reply: String,
    },
}

fn build_chat_service(options: ChatOptions) -> Result<ChatService> {
    // The API key is checked here so a missing key stops the process at startup
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(?config, "Loaded configuration");

    let completion =
        CompletionClient::new(&config).context("Failed to initialize completion client")?;
    let playback: Arc<dyn PlaybackTrigger> = if options.no_playback {
        Arc::new(LogOnlyPlayback)
    } else {
        Arc::new(YouTubeLauncher::new(options.opener))
    };

    Ok(ChatService::new(
        completion,
        Resolver::default(),
        playback,
        SessionStore::with_limits(config.max_sessions, config.session_ttl),
        TranscriptLog::new(options.log_file),
    ))
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for the API key)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,tunechat=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            templates,
            static_dir,
            options,
        } => {
            let chat = Arc::new(build_chat_service(options)?);
            let state = AppState::new(chat, templates);
            let app = web_server::build_router(state, &static_dir);
            web_server::start_web_server(SocketAddr::new(host, port), app).await?;
            info!("Shutdown complete.");
        }
        Commands::Chat { options } => {
            let service = build_chat_service(options)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            chat::run_terminal_chat(&service, stdin, tokio::io::stdout())
                .await
                .context("Chat session failed")?;
            info!("Chat session finished.");
        }
        Commands::Resolve { user, reply } => {
            let decision = Resolver::default().resolve(&ResolverInput::new(user, reply));
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
    }

    Ok(())
}
