use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Local;
use tokio::sync::mpsc;

use ledgerpilot_chat::Transcript;
use ledgerpilot_client::{ApiClient, abort_pair};
use ledgerpilot_config::AppConfig;

// ── Conversations ────────────────────────────────────────────────────────────

pub(crate) async fn list_conversations(client: &ApiClient, project_id: i64) -> Result<()> {
    let conversations = client.list_conversations(project_id).await?;
    if conversations.is_empty() {
        println!("(no conversations)");
        return Ok(());
    }
    println!("── conversations (project {project_id}) ──────────────────────────────");
    for conv in &conversations {
        println!(
            "  {:<24}  {:<20}  {}",
            conv.id,
            conv.updated_at.as_deref().or(conv.created_at.as_deref()).unwrap_or("-"),
            conv.title.as_deref().unwrap_or("(untitled)")
        );
    }
    println!("  ({} total)", conversations.len());
    Ok(())
}

pub(crate) async fn show_conversation(
    client: &ApiClient,
    project_id: i64,
    conversation_id: &str,
) -> Result<()> {
    let conv = client.get_conversation(project_id, conversation_id).await?;
    if let Some(title) = &conv.title {
        println!("# {title}");
    }
    for message in &conv.messages {
        println!("{}> {}", message.role, message.content);
        println!();
    }
    Ok(())
}

// ── Commits ──────────────────────────────────────────────────────────────────

pub(crate) async fn list_commits(client: &ApiClient, project_id: i64) -> Result<()> {
    let commits = client.list_commits(project_id).await?;
    if commits.is_empty() {
        println!("(no commits)");
        return Ok(());
    }
    for commit in &commits {
        println!(
            "{}  {:<20}  {}",
            commit.short_hash(),
            commit.timestamp.as_deref().unwrap_or("-"),
            commit.subject()
        );
    }
    Ok(())
}

pub(crate) async fn show_diff(
    client: &ApiClient,
    project_id: i64,
    hash: &str,
    file: &str,
) -> Result<()> {
    let diff = client.commit_diff(project_id, hash, file).await?;
    print!("{diff}");
    if !diff.ends_with('\n') {
        println!();
    }
    Ok(())
}

// ── Files ────────────────────────────────────────────────────────────────────

pub(crate) async fn read_file(client: &ApiClient, project_id: i64, path: &str) -> Result<()> {
    let file = client.read_file(project_id, path).await?;
    print!("{}", file.content);
    Ok(())
}

/// Write `path` on the server from a local file, or from stdin when no
/// source is given.
pub(crate) async fn write_file(
    client: &ApiClient,
    project_id: i64,
    path: &str,
    source: Option<&Path>,
) -> Result<()> {
    let content = match source {
        Some(source) => fs::read_to_string(source)
            .with_context(|| format!("reading {}", source.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    client.write_file(project_id, path, &content).await?;
    println!("wrote {path} ({} bytes)", content.len());
    Ok(())
}

pub(crate) async fn list_files(client: &ApiClient, project_id: i64, dir: &str) -> Result<()> {
    let entries = client.list_dir(project_id, dir).await?;
    for entry in &entries {
        let name = if entry.path.is_empty() { &entry.name } else { &entry.path };
        let suffix = if entry.is_dir { "/" } else { "" };
        match entry.size {
            Some(size) if !entry.is_dir => println!("{name}{suffix}  ({size} bytes)"),
            _ => println!("{name}{suffix}"),
        }
    }
    Ok(())
}

// ── Nodes ────────────────────────────────────────────────────────────────────

/// Print a node's log lines until the stream ends or Ctrl-C.
pub(crate) async fn follow_logs(client: &ApiClient, node_id: i64) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (abort, signal) = abort_pair();
    let client = client.clone();
    let follow = tokio::spawn(async move { client.follow_node_logs(node_id, tx, signal).await });
    let mut interrupts = crate::chat::spawn_interrupts();

    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                println!("{line}");
            }
            Some(()) = interrupts.recv() => abort.abort(),
        }
    }

    match follow.await.context("log stream task failed")? {
        Ok(()) => Ok(()),
        Err(err) if err.is_abort() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

// ── Download ─────────────────────────────────────────────────────────────────

pub(crate) async fn download(
    client: &ApiClient,
    project_id: i64,
    output: Option<PathBuf>,
) -> Result<()> {
    let dest = output.unwrap_or_else(|| PathBuf::from(format!("project-{project_id}.zip")));
    let bytes = client.download_project(project_id, &dest).await?;
    println!("saved {} ({bytes} bytes)", dest.display());
    Ok(())
}

// ── Local transcript ─────────────────────────────────────────────────────────

pub(crate) fn history_show(transcript: &Transcript, limit: usize) -> Result<()> {
    let records = transcript.load_recent(limit.max(1))?;
    if records.is_empty() {
        println!("(no turns recorded today)");
    }
    for record in records {
        let time = record.timestamp.with_timezone(&Local).format("%H:%M:%S");
        println!("[{time}] {}> {}", record.role.as_str(), record.content);
        for tool in &record.tools {
            match &tool.error {
                Some(error) => println!("           ⚙ {} {} ({error})", tool.name, tool.status.as_str()),
                None => println!("           ⚙ {} {}", tool.name, tool.status.as_str()),
            }
        }
    }
    Ok(())
}

// ── Config ───────────────────────────────────────────────────────────────────

/// Effective configuration as TOML, with secrets masked.
pub(crate) fn render_config(config: &AppConfig) -> Result<String> {
    let mut shown = config.clone();
    if !shown.server.api_token.is_empty() {
        shown.server.api_token = "********".to_string();
    }
    if !shown.server.password.is_empty() {
        shown.server.password = "********".to_string();
    }
    Ok(toml::to_string_pretty(&shown)?)
}

pub(crate) fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default().save_to(path)?;
    println!("wrote default configuration to {}", path.display());
    Ok(())
}
