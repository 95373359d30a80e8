use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use arboard::Clipboard;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ledgerpilot_chat::{ChatMessage, ChatSession, Role, ToolResultHook, Transcript};
use ledgerpilot_client::{ApiClient, ChatRequest, FileEntry, abort_pair};
use ledgerpilot_config::AppConfig;
use ledgerpilot_tools::{ToolKind, ToolView};

use crate::render::Renderer;

/// Marks the project file listing stale after a tool that may have changed
/// files.  The reload itself happens outside the reducer.
#[derive(Debug, Default)]
struct FileReloadHook {
    pending: bool,
}

impl ToolResultHook for FileReloadHook {
    fn on_tool_result(&mut self, name: &str, _result: &Value) {
        if ToolKind::from_name(name).mutates_files() {
            debug!(tool = name, "project files changed");
            self.pending = true;
        }
    }
}

fn spawn_file_reload(
    client: &ApiClient,
    project_id: i64,
    tx: &mpsc::UnboundedSender<Vec<FileEntry>>,
) -> JoinHandle<()> {
    let client = client.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        match client.list_dir(project_id, "").await {
            Ok(entries) => {
                let _ = tx.send(entries);
            }
            Err(err) => warn!("reloading project files failed: {err}"),
        }
    })
}

/// Forward every Ctrl-C for the rest of the process into a channel.  Once
/// installed, SIGINT no longer terminates the process, so the chat loop has
/// to act on each one.
pub(crate) fn spawn_interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Read stdin lines on a plain thread; a blocked read must not keep the
/// runtime from shutting down.
fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    });
    rx
}

pub(crate) struct ChatContext {
    client: ApiClient,
    project_id: i64,
    conversation_id: Option<String>,
    session: ChatSession,
    renderer: Renderer<Box<dyn Write>>,
    transcript: Option<Transcript>,
    /// Messages before this index are already in the transcript.
    recorded: usize,
    preview_interval: Duration,
    /// Last known project listing; `None` until first fetched.
    files: Option<Vec<FileEntry>>,
    files_tx: mpsc::UnboundedSender<Vec<FileEntry>>,
    files_rx: mpsc::UnboundedReceiver<Vec<FileEntry>>,
    reload: Option<JoinHandle<()>>,
    interrupts: mpsc::UnboundedReceiver<()>,
}

impl ChatContext {
    pub(crate) fn new(
        config: &AppConfig,
        client: ApiClient,
        project_id: i64,
        out: Box<dyn Write>,
        color: bool,
        interactive: bool,
        interrupts: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        let (files_tx, files_rx) = mpsc::unbounded_channel();
        let transcript = config
            .chat
            .transcript_enabled
            .then(|| Transcript::new(&config.chat.transcript_dir));
        Self {
            client,
            project_id,
            conversation_id: None,
            session: ChatSession::new(),
            renderer: Renderer::new(
                out,
                color,
                interactive,
                config.chat.show_arguments,
                config.chat.max_view_lines,
            ),
            transcript,
            recorded: 0,
            preview_interval: Duration::from_millis(config.chat.preview_interval_ms.max(50)),
            files: None,
            files_tx,
            files_rx,
            reload: None,
            interrupts,
        }
    }

    pub(crate) fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Continue a conversation stored on the server.
    pub(crate) async fn resume(&mut self, conversation_id: &str) -> Result<()> {
        let conversation = self
            .client
            .get_conversation(self.project_id, conversation_id)
            .await
            .with_context(|| format!("loading conversation {conversation_id}"))?;

        let messages: Vec<ChatMessage> = conversation
            .messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| match m.role.as_str() {
                "user" => ChatMessage::user(m.content.clone()),
                _ => ChatMessage::assistant(m.content.clone()),
            })
            .collect();
        info!(
            conversation_id,
            messages = messages.len(),
            "resumed conversation"
        );
        self.session = ChatSession::with_history(messages);
        self.recorded = self.session.messages().len();
        self.conversation_id = Some(conversation_id.to_string());
        Ok(())
    }

    /// Start over with an empty conversation.
    pub(crate) fn reset(&mut self) {
        self.session.clear();
        self.recorded = 0;
        self.conversation_id = None;
    }

    /// Run one chat turn: send the prompt, render events as they arrive, and
    /// settle the session when the stream ends.
    pub(crate) async fn run_turn(&mut self, prompt: &str) -> Result<()> {
        let messages = self.session.submit(prompt);
        self.record_sealed();

        let request = ChatRequest {
            conversation_id: self.conversation_id.clone(),
            project_id: self.project_id,
            messages,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();
        let client = self.client.clone();
        let stream = tokio::spawn(async move { client.stream_chat(&request, tx, signal).await });

        let mut hook = FileReloadHook::default();
        let mut ticker = tokio::time::interval(self.preview_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let change = self.session.apply(event, &mut hook);
                    self.renderer.on_change(&self.session, &change)?;
                    if std::mem::take(&mut hook.pending) {
                        self.reload = Some(spawn_file_reload(
                            &self.client,
                            self.project_id,
                            &self.files_tx,
                        ));
                    }
                }
                _ = ticker.tick() => {
                    self.renderer.preview(&self.session)?;
                }
                Some(entries) = self.files_rx.recv() => {
                    debug!(entries = entries.len(), "project files reloaded");
                    self.files = Some(entries);
                }
                Some(()) = self.interrupts.recv() => {
                    if !abort.is_aborted() {
                        debug!("stop requested");
                        abort.abort();
                    }
                }
            }
        }

        match stream.await.context("chat stream task failed")? {
            Ok(stats) => {
                debug!(?stats, "turn finished");
                self.session.finish();
                self.renderer.finish_turn()?;
            }
            Err(err) if err.is_abort() => {
                self.session.abort();
                self.renderer.notice("stopped")?;
            }
            Err(err) => {
                warn!("chat turn failed: {err}");
                self.session.fail(err.to_string());
                self.renderer.error(&err.to_string())?;
            }
        }
        self.record_sealed();
        Ok(())
    }

    /// Append every sealed message not yet in the transcript.
    fn record_sealed(&mut self) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        let messages = self.session.messages();
        while self.recorded < messages.len() && messages[self.recorded].is_sealed() {
            if let Err(err) = transcript.append(&messages[self.recorded]) {
                warn!("writing transcript failed: {err:#}");
            }
            self.recorded += 1;
        }
    }

    /// Copy the last tool view, or failing that the last assistant reply.
    pub(crate) fn copy_last(&mut self) -> Result<()> {
        let text = self.renderer.last_view().map(ToolView::plain_text).or_else(|| {
            self.session
                .messages()
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .map(ChatMessage::text)
                .filter(|text| !text.is_empty())
        });
        let Some(text) = text else {
            self.renderer.notice("nothing to copy yet")?;
            return Ok(());
        };
        match Clipboard::new().and_then(|mut cb| cb.set_text(text)) {
            Ok(_) => self.renderer.notice("copied to clipboard")?,
            Err(err) => self.renderer.error(&format!("clipboard error: {err}"))?,
        }
        Ok(())
    }

    /// Drop interrupts that arrived while no turn was running to see them.
    fn drain_interrupts(&mut self) {
        while self.interrupts.try_recv().is_ok() {}
    }

    /// Project listing, refreshed by tool results that change files.  Only
    /// fetched from the server when nothing is known yet.
    async fn refresh_files(&mut self) -> Result<()> {
        if let Some(reload) = self.reload.take() {
            if let Err(err) = reload.await {
                warn!("file reload task failed: {err}");
            }
        }
        while let Ok(entries) = self.files_rx.try_recv() {
            self.files = Some(entries);
        }
        if self.files.is_none() {
            self.files = Some(self.client.list_dir(self.project_id, "").await?);
        }
        Ok(())
    }

    pub(crate) async fn show_files(&mut self) -> Result<()> {
        if let Err(err) = self.refresh_files().await {
            self.renderer.error(&format!("{err:#}"))?;
            return Ok(());
        }
        let lines: Vec<String> = self
            .files
            .iter()
            .flatten()
            .map(|entry| {
                let suffix = if entry.is_dir { "/" } else { "" };
                let path = if entry.path.is_empty() { &entry.name } else { &entry.path };
                format!("  {path}{suffix}")
            })
            .collect();
        if lines.is_empty() {
            self.renderer.line("(no files)")?;
        }
        for line in &lines {
            self.renderer.line(line)?;
        }
        Ok(())
    }
}

fn print_help() {
    println!("/help   show this list");
    println!("/copy   copy the last tool output (or reply) to the clipboard");
    println!("/files  list project files");
    println!("/new    start a new conversation");
    println!("/exit   leave the session");
    println!("Ctrl-C stops the current reply, or leaves when idle.");
}

pub(crate) async fn run_interactive_session(mut ctx: ChatContext, base_url: &str) -> Result<()> {
    println!("ledgerpilot chat · project {} · {base_url}", ctx.project_id);
    println!("type a message, or /help for commands");
    if !ctx.session().messages().is_empty() {
        println!("({} earlier messages loaded)", ctx.session().messages().len());
    }

    let mut lines = spawn_stdin_lines();
    loop {
        ctx.drain_interrupts();
        print!("you> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.recv() => line,
            Some(()) = ctx.interrupts.recv() => {
                println!();
                break;
            }
        };
        let line = match line {
            Some(line) => line?,
            None => {
                println!();
                break;
            }
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => print_help(),
            "/copy" => ctx.copy_last()?,
            "/files" => ctx.show_files().await?,
            "/new" => {
                ctx.reset();
                println!("started a new conversation");
            }
            other if other.starts_with('/') => {
                println!("unknown command {other}; try /help");
            }
            prompt => ctx.run_turn(prompt).await?,
        }
    }

    println!("session closed");
    Ok(())
}

/// One non-interactive turn.  With `json`, nothing is streamed and the final
/// assistant message is printed as JSON instead.
pub(crate) async fn run_ask(mut ctx: ChatContext, prompt: &str, json: bool) -> Result<()> {
    ctx.run_turn(prompt).await?;

    if json {
        let reply = ctx
            .session()
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant);
        println!("{}", serde_json::to_string_pretty(&reply)?);
    }
    if let Some(error) = ctx.session().last_error() {
        bail!("chat failed: {error}");
    }
    Ok(())
}
