mod chat;
mod commands;
mod render;

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use ledgerpilot_chat::Transcript;
use ledgerpilot_client::ApiClient;
use ledgerpilot_config::{AppConfig, DEFAULT_CONFIG_PATH, TelemetryConfig};

use crate::chat::ChatContext;

#[derive(Debug, Parser)]
#[command(
    name = "ledgerpilot",
    version,
    about = "Terminal companion for the chaincode AI assistant"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Chaincode project id (overrides `project.default_project_id`).
    #[arg(long, short, global = true)]
    project: Option<i64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat with the project assistant.
    Chat {
        /// Continue a conversation stored on the server.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Send one prompt, print the reply, and exit.
    Ask {
        prompt: String,
        #[arg(long)]
        conversation: Option<String>,
        /// Print the final assistant message as JSON instead of streaming.
        #[arg(long)]
        json: bool,
    },
    /// Browse conversations stored on the server.
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Inspect the project's commit history.
    Commits {
        #[command(subcommand)]
        command: CommitCommands,
    },
    /// Read, write and list project files.
    Files {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Follow a node's logs until Ctrl-C.
    Logs {
        /// Node id.
        node: i64,
    },
    /// Download the project as a zip archive.
    Download {
        /// Project id (defaults to --project or the configured project).
        project: Option<i64>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Manage the local chat transcript (daily JSONL).
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Show or create the configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConversationCommands {
    List,
    Show { id: String },
}

#[derive(Debug, Subcommand)]
enum CommitCommands {
    List,
    /// Show the diff of one file at a commit.
    Diff {
        hash: String,
        #[arg(long)]
        file: String,
    },
}

#[derive(Debug, Subcommand)]
enum FileCommands {
    Read {
        path: String,
    },
    /// Write a project file from a local file, or stdin.
    Write {
        path: String,
        #[arg(long)]
        from: Option<PathBuf>,
    },
    Ls {
        #[arg(default_value = "")]
        dir: String,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommands {
    /// Show the path to today's transcript.
    Path,
    /// Print today's most recent turns.
    Show {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete today's transcript.
    Clear,
    /// Export today's transcript to a file.
    Export {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (secrets masked).
    Show,
    /// Write a default configuration file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

/// Logs go to a daily file so they never interleave with streamed output.
fn init_logging(telemetry: &TelemetryConfig) -> Result<WorkerGuard> {
    fs::create_dir_all(&telemetry.log_dir)
        .with_context(|| format!("creating log dir {}", telemetry.log_dir))?;
    let appender = tracing_appender::rolling::daily(&telemetry.log_dir, "ledgerpilot.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn is_terminal() -> bool {
    io::stdout().is_terminal()
}

fn use_color() -> bool {
    is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn require_project(config: &AppConfig, explicit: Option<i64>) -> Result<i64> {
    config.project_id(explicit).context(
        "no project selected; pass --project or set project.default_project_id in the config",
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let _log_guard = init_logging(&config.telemetry)?;
    tracing::debug!(config = %cli.config.display(), server = %config.server.base_url, "starting");

    let command = cli.command.unwrap_or(Commands::Chat { conversation: None });

    // Commands that never talk to the server.
    match &command {
        Commands::History { command } => {
            let transcript = Transcript::new(&config.chat.transcript_dir);
            match command {
                HistoryCommands::Path => println!("{}", transcript.file_path().display()),
                HistoryCommands::Show { limit } => commands::history_show(&transcript, *limit)?,
                HistoryCommands::Clear => {
                    transcript.clear()?;
                    println!("today's transcript cleared");
                }
                HistoryCommands::Export { path } => {
                    transcript.export(path)?;
                    println!("transcript exported to {}", path.display());
                }
            }
            return Ok(());
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => print!("{}", commands::render_config(&config)?),
                ConfigCommands::Init { force } => commands::init_config(&cli.config, *force)?,
            }
            return Ok(());
        }
        _ => {}
    }

    if !config.has_credentials() {
        tracing::warn!("no api token or username configured; requests are unauthenticated");
    }
    let client = ApiClient::new(&config.server)?;

    match command {
        Commands::Chat { conversation } => {
            let project_id = require_project(&config, cli.project)?;
            let mut ctx = ChatContext::new(
                &config,
                client.clone(),
                project_id,
                Box::new(io::stdout()),
                use_color(),
                is_terminal(),
                chat::spawn_interrupts(),
            );
            if let Some(id) = conversation {
                ctx.resume(&id).await?;
            }
            chat::run_interactive_session(ctx, client.base_url()).await?;
        }
        Commands::Ask {
            prompt,
            conversation,
            json,
        } => {
            let project_id = require_project(&config, cli.project)?;
            let out: Box<dyn Write> = if json {
                Box::new(io::sink())
            } else {
                Box::new(io::stdout())
            };
            let mut ctx = ChatContext::new(
                &config,
                client,
                project_id,
                out,
                use_color() && !json,
                is_terminal() && !json,
                chat::spawn_interrupts(),
            );
            if let Some(id) = conversation {
                ctx.resume(&id).await?;
            }
            chat::run_ask(ctx, &prompt, json).await?;
        }
        Commands::Conversations { command } => {
            let project_id = require_project(&config, cli.project)?;
            match command {
                ConversationCommands::List => {
                    commands::list_conversations(&client, project_id).await?
                }
                ConversationCommands::Show { id } => {
                    commands::show_conversation(&client, project_id, &id).await?
                }
            }
        }
        Commands::Commits { command } => {
            let project_id = require_project(&config, cli.project)?;
            match command {
                CommitCommands::List => commands::list_commits(&client, project_id).await?,
                CommitCommands::Diff { hash, file } => {
                    commands::show_diff(&client, project_id, &hash, &file).await?
                }
            }
        }
        Commands::Files { command } => {
            let project_id = require_project(&config, cli.project)?;
            match command {
                FileCommands::Read { path } => {
                    commands::read_file(&client, project_id, &path).await?
                }
                FileCommands::Write { path, from } => {
                    commands::write_file(&client, project_id, &path, from.as_deref()).await?
                }
                FileCommands::Ls { dir } => commands::list_files(&client, project_id, &dir).await?,
            }
        }
        Commands::Logs { node } => commands::follow_logs(&client, node).await?,
        Commands::Download { project, output } => {
            let project_id = require_project(&config, project.or(cli.project))?;
            commands::download(&client, project_id, output).await?;
        }
        Commands::History { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_chat() {
        let cli = Cli::try_parse_from(["ledgerpilot"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, Path::new(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn global_project_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["ledgerpilot", "files", "ls", "chaincode", "--project", "7"])
            .unwrap();
        assert_eq!(cli.project, Some(7));
        match cli.command {
            Some(Commands::Files {
                command: FileCommands::Ls { dir },
            }) => assert_eq!(dir, "chaincode"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn require_project_prefers_flag() {
        let mut config = AppConfig::default();
        assert!(require_project(&config, None).is_err());
        config.project.default_project_id = Some(2);
        assert_eq!(require_project(&config, None).unwrap(), 2);
        assert_eq!(require_project(&config, Some(5)).unwrap(), 5);
    }
}
