//! Local chat transcript: daily JSONL files under the configured directory.
//!
//! This is a thin append-only record of finished turns kept on the user's
//! machine.  It is unrelated to the conversation history stored by the
//! server and is never sent anywhere.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use uuid::Uuid;

use crate::session::{ChatMessage, Role, ToolStatus};

// ──────────────────────────────────────────────────────────────────────────────
// Public types
// ──────────────────────────────────────────────────────────────────────────────

/// Outcome of one tool call, as persisted.  Arguments and results are left
/// out; they can be large and may contain file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single turn persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Identifies the CLI session that wrote the turn.
    pub session: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSummary>,
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn from_message(session: Uuid, message: &ChatMessage) -> Self {
        Self {
            session,
            role: message.role,
            content: message.text(),
            tools: message
                .tool_calls()
                .map(|call| ToolSummary {
                    name: call.name.clone(),
                    status: call.status,
                    error: call.error.clone(),
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Transcript
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Transcript {
    dir: PathBuf,
    session: Uuid,
}

impl Transcript {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            session: Uuid::new_v4(),
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/YYYY-MM-DD.jsonl` for today's local date.
    pub fn file_path(&self) -> PathBuf {
        let today = Local::now().format("%Y-%m-%d").to_string();
        self.dir.join(format!("{today}.jsonl"))
    }

    /// Append one finished message to today's file, creating it (and parent
    /// directories) if needed.
    pub fn append(&self, message: &ChatMessage) -> Result<()> {
        let record = TurnRecord::from_message(self.session, message);
        if record.content.trim().is_empty() && record.tools.is_empty() {
            return Ok(());
        }
        self.append_record(&record)
    }

    pub fn append_record(&self, record: &TurnRecord) -> Result<()> {
        let path = self.file_path();
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create transcript dir {}", self.dir.display()))?;

        let line = serde_json::to_string(record).context("serialize TurnRecord")?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open transcript {}", path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Up to `max_turns` most recent turns from today's file.  Unreadable
    /// lines are skipped.
    pub fn load_recent(&self, max_turns: usize) -> Result<Vec<TurnRecord>> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(vec![]);
        }
        let file =
            fs::File::open(&path).with_context(|| format!("open transcript {}", path.display()))?;

        let mut records: Vec<TurnRecord> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                serde_json::from_str(trimmed).ok()
            })
            .collect();

        if records.len() > max_turns {
            let skip = records.len() - max_turns;
            records.drain(..skip);
        }
        Ok(records)
    }

    /// Delete today's file.
    pub fn clear(&self) -> Result<()> {
        let path = self.file_path();
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove transcript {}", path.display()))?;
        }
        Ok(())
    }

    /// Copy today's file to `dest`.
    pub fn export(&self, dest: &Path) -> Result<()> {
        let path = self.file_path();
        if !path.exists() {
            anyhow::bail!("no transcript for today ({} does not exist)", path.display());
        }
        fs::copy(&path, dest)
            .with_context(|| format!("copy {} -> {}", path.display(), dest.display()))?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
