//! fetchgate CLI
//!
//! Command-line playlist client: login, cached reads and writes, and a live
//! view driven by server push events.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fetchgate_core::{Config, Coordinator};

mod api;
mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "fetchgate")]
#[command(about = "fetchgate - playlist client with cached, authenticated API access")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store credentials
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget stored credentials
    Logout,
    /// Show session status
    Status,
    /// List playlists
    #[command(alias = "ls")]
    Playlists {
        /// Page number
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show one playlist with its tracks
    Playlist {
        /// Playlist ID
        id: String,
    },
    /// Create a playlist
    CreatePlaylist {
        /// Playlist name
        name: String,
    },
    /// Rename a playlist
    RenamePlaylist {
        /// Playlist ID
        id: String,
        /// New name
        name: String,
    },
    /// Follow playlist changes pushed by the server (Ctrl-C to stop)
    Watch,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config = Config::load()?;

    // Commands that don't talk to the API
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => commands::config::show(&config, &output),
        };
    }

    let api = Coordinator::from_config(&config)?;

    match cli.command {
        Commands::Login { email, password } => {
            commands::auth::login(&api, email, password, &output).await
        }
        Commands::Logout => commands::auth::logout(&api, &output),
        Commands::Status => commands::auth::status(&api, &config, &output),
        Commands::Playlists { page } => commands::playlist::list(&api, page, &output).await,
        Commands::Playlist { id } => commands::playlist::show(&api, id, &output).await,
        Commands::CreatePlaylist { name } => {
            commands::playlist::create(&api, name, &output).await
        }
        Commands::RenamePlaylist { id, name } => {
            commands::playlist::rename(&api, id, name, &output).await
        }
        Commands::Watch => commands::watch::run(&api, &config, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

/// Log to stderr, filtered by RUST_LOG when set
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "fetchgate_core={},fetchgate_cli={}",
            default_level, default_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
