use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::NovaConfig;

#[derive(Parser)]
#[command(name = "nova")]
#[command(about = "Terminal client for Nova chat")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.nova)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant (default)
    Chat(ChatArgs),

    /// List the modalities the company offers
    Modalities(ModalitiesArgs),

    /// Transcribe an audio file
    Transcribe(TranscribeArgs),

    /// Manage cached sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Parser, Default)]
struct ChatArgs {
    /// Modality key to use instead of prompting
    #[arg(short, long)]
    modality: Option<String>,

    /// Keep sessions in memory only
    #[arg(long)]
    ephemeral: bool,
}

#[derive(Parser)]
struct ModalitiesArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct TranscribeArgs {
    /// Audio file (webm, wav, mp3)
    file: PathBuf,

    /// Recording length in seconds
    #[arg(long, default_value = "0")]
    duration: f64,
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// Forget every cached session
    Clear,
}

/// Logs go to stderr so the transcript on stdout stays clean.
fn init_logging(debug: bool) {
    let default_directive = if debug {
        "nova=debug,nova_chat=debug,warn"
    } else {
        "nova=warn,nova_chat=warn,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = NovaConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => cli::chat::chat_command(&config, None, false).await,
        Some(Commands::Chat(args)) => {
            cli::chat::chat_command(&config, args.modality, args.ephemeral).await
        }
        Some(Commands::Modalities(args)) => cli::modalities_command(&config, args.json).await,
        Some(Commands::Transcribe(args)) => {
            cli::transcribe_command(&config, &args.file, args.duration).await
        }
        Some(Commands::Sessions {
            command: SessionsCommand::Clear,
        }) => cli::sessions_clear_command(&config),
        Some(Commands::Config) => cli::config_command(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_means_chat() {
        let cli = Cli::try_parse_from(["nova"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nova",
            "chat",
            "--modality",
            "sales",
            "--ephemeral",
            "--debug",
            "--data-dir",
            "/tmp/nova",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/nova")));
        match cli.command {
            Some(Commands::Chat(args)) => {
                assert_eq!(args.modality.as_deref(), Some("sales"));
                assert!(args.ephemeral);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn transcribe_args() {
        let cli = Cli::try_parse_from(["nova", "transcribe", "clip.webm", "--duration", "4.5"]).unwrap();
        match cli.command {
            Some(Commands::Transcribe(args)) => {
                assert_eq!(args.file, PathBuf::from("clip.webm"));
                assert_eq!(args.duration, 4.5);
            }
            _ => panic!("expected transcribe"),
        }
    }

    #[test]
    fn sessions_requires_subcommand() {
        assert!(Cli::try_parse_from(["nova", "sessions"]).is_err());
        assert!(matches!(
            Cli::try_parse_from(["nova", "sessions", "clear"]).unwrap().command,
            Some(Commands::Sessions {
                command: SessionsCommand::Clear
            })
        ));
    }
}
