use clap::{Parser, Subcommand};
use tracing::Level;

use caravel_cli::{ConfigCommands, ManifestCommands, PublishCommands, SyncCommands, commands};

#[derive(Parser)]
#[command(
    name = "caravel",
    about = "Sync driver and channel publisher for Caravel game installs",
    version,
    author,
    long_about = "A command-line tool for keeping game installs in sync with a published \
                  channel: install, repair, update and uninstall driven by a checksum \
                  manifest, plus the publishing side that produces that manifest."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a local install with its channel
    #[command(subcommand)]
    Sync(SyncCommands),

    /// Build and publish a channel
    #[command(subcommand)]
    Publish(PublishCommands),

    /// Inspect manifest documents
    #[command(subcommand)]
    Manifest(ManifestCommands),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Sync(cmd) => commands::sync::handle(cmd).await?,
        Commands::Publish(cmd) => commands::publish::handle(cmd).await?,
        Commands::Manifest(cmd) => commands::manifest::handle(cmd)?,
        Commands::Config(cmd) => commands::config::handle(cmd)?,
    }

    Ok(())
}
