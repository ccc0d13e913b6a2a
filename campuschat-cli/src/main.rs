use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use campuschat_appcore::service::data_dir_for;
use campuschat_appcore::{AppService, user_facing_error};
use campuschat_runtime::{ConfigStore, KeyringVault, MemoryVault, TokenVault, defaults};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod render;
mod repl;

use commands::{ConversationCmd, DocsCmd};

/// Terminal client for the campus assistant.
#[derive(Debug, Parser)]
#[command(name = "campuschat", version, about)]
struct Cli {
    /// Backend base URL (overrides the config file).
    #[arg(long, env = "CAMPUSCHAT_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Config file path.
    #[arg(long, env = "CAMPUSCHAT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Keep the token in memory only; nothing touches the OS keyring.
    #[arg(long, global = true)]
    no_keyring: bool,

    /// More log output on stderr (-v info, -vv debug). `RUST_LOG` wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default).
    Chat {
        /// Start a fresh conversation instead of resuming the last one.
        #[arg(long)]
        new: bool,
    },
    /// Ask one question and print the streamed answer.
    Ask { message: Vec<String> },
    /// Push-to-talk voice conversation.
    Talk,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAMPUSCHAT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Logout,
    Whoami,
    #[command(subcommand)]
    Conversations(ConversationCmd),
    /// Recent chat history across conversations.
    History {
        #[arg(long)]
        clear: bool,
    },
    #[command(subcommand)]
    Docs(DocsCmd),
    Stats,
    Health,
    Voices,
    /// Synthesize speech and save it to a file.
    Say {
        text: Vec<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration (including overrides) back to disk.
        #[arg(long)]
        save: bool,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries the conversation; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn token_vault(no_keyring: bool) -> Arc<dyn TokenVault> {
    if no_keyring {
        return Arc::new(MemoryVault::default());
    }
    match KeyringVault::new() {
        Ok(v) => Arc::new(v),
        Err(e) => {
            log::warn!("OS keyring unavailable, token will not persist: {e:#}");
            Arc::new(MemoryVault::default())
        }
    }
}

fn open_service(cli: &Cli) -> anyhow::Result<AppService> {
    let (config_path, data_dir) = match &cli.config {
        Some(p) => (p.clone(), data_dir_for(p)),
        None => (defaults::config_path(), defaults::data_dir()),
    };
    let base_url = cli.base_url.clone();
    AppService::open(
        ConfigStore::at_path(config_path),
        move |cfg| match base_url {
            Some(url) => cfg.with_base_url(url),
            None => cfg,
        },
        &data_dir,
        token_vault(cli.no_keyring),
    )
    .context("start client")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        log::debug!("{e:#}");
        eprintln!("error: {}", user_facing_error(&e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let svc = open_service(&cli)?;
    let command = cli.command.unwrap_or(Command::Chat { new: false });

    match command {
        Command::Chat { new } => {
            commands::require_sign_in(&svc)?;
            repl::chat(&svc, new).await
        }
        Command::Ask { message } => {
            commands::require_sign_in(&svc)?;
            repl::ask(&svc, &message.join(" ")).await.map(|_| ())
        }
        Command::Talk => {
            commands::require_sign_in(&svc)?;
            repl::talk(&svc).await
        }
        Command::Login { email, password } => commands::login(&svc, &email, password).await,
        Command::Logout => {
            svc.logout()?;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => commands::whoami(&svc),
        Command::Conversations(cmd) => commands::conversations(&svc, cmd).await,
        Command::History { clear } => commands::history(&svc, clear).await,
        Command::Docs(cmd) => commands::docs(&svc, cmd).await,
        Command::Stats => commands::stats(&svc).await,
        Command::Health => commands::health(&svc).await,
        Command::Voices => commands::voices(&svc).await,
        Command::Say { text, voice, out } => commands::say(&svc, &text.join(" "), voice, out).await,
        Command::Config { save } => commands::config(&svc, save),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_schema_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_chat() {
        let cli = Cli::parse_from(["campuschat", "--base-url", "https://bot.example.edu"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.base_url.as_deref(), Some("https://bot.example.edu"));
    }

    #[test]
    fn parses_nested_docs_command() {
        let cli = Cli::parse_from(["campuschat", "docs", "upload", "syllabus.pdf", "--no-wait"]);
        match cli.command {
            Some(Command::Docs(DocsCmd::Upload { path, no_wait })) => {
                assert_eq!(path, PathBuf::from("syllabus.pdf"));
                assert!(no_wait);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
