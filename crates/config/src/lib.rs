use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Default on-disk location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ── Server ────────────────────────────────────────────────────────────────────

/// Where the administration server lives and how to authenticate against it.
///
/// Either `api_token` (sent as a bearer token) or `username`/`password`
/// (basic auth) may be set.  When both are present the token wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub api_token: String,
    pub username: String,
    pub password: String,
    pub connect_timeout_secs: u64,
    /// Timeout for plain request/response calls.  Streaming calls (chat,
    /// node logs) only use the connect timeout since they are open-ended.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8100".to_string(),
            api_token: String::new(),
            username: String::new(),
            password: String::new(),
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
    /// Chaincode project used when a command is not given `--project`.
    pub default_project_id: Option<i64>,
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// How often the active tool's accumulated arguments are re-rendered as a
    /// progress preview while the tool is streaming.
    pub preview_interval_ms: u64,
    /// Print the finalized arguments when a tool starts executing.
    pub show_arguments: bool,
    /// Maximum body lines rendered per tool view before truncation.
    pub max_view_lines: usize,
    /// Append finished turns to the local JSONL transcript.
    pub transcript_enabled: bool,
    pub transcript_dir: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            preview_interval_ms: 500,
            show_arguments: true,
            max_view_lines: 20,
            transcript_enabled: true,
            transcript_dir: ".ledgerpilot/history".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: ".ledgerpilot/logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub project: ProjectConfig,
    pub chat: ChatConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("LEDGERPILOT_URL") {
            if !value.trim().is_empty() {
                config.server.base_url = value.trim().to_string();
            }
        }

        // Token from the environment takes precedence over the file so it
        // never has to be written to disk.
        if let Ok(token) = env::var("LEDGERPILOT_TOKEN") {
            if !token.is_empty() {
                config.server.api_token = token;
            }
        }

        if let Ok(raw) = env::var("LEDGERPILOT_PROJECT") {
            if let Ok(id) = raw.trim().parse::<i64>() {
                config.project.default_project_id = Some(id);
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Resolve the project to act on: an explicit id wins over the configured
    /// default.
    pub fn project_id(&self, explicit: Option<i64>) -> Option<i64> {
        explicit.or(self.project.default_project_id)
    }

    pub fn has_credentials(&self) -> bool {
        !self.server.api_token.is_empty() || !self.server.username.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.base_url, "http://localhost:8100");
        assert!(cfg.server.api_token.is_empty());
        assert_eq!(cfg.server.connect_timeout_secs, 10);
        assert_eq!(cfg.chat.preview_interval_ms, 500);
        assert_eq!(cfg.chat.max_view_lines, 20);
        assert!(cfg.chat.transcript_enabled);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(cfg.project.default_project_id.is_none());
        assert!(!cfg.has_credentials());
    }

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.chat.preview_interval_ms, 500);
        assert_eq!(cfg.telemetry.log_dir, ".ledgerpilot/logs");
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[project]
default_project_id = 7

[chat]
max_view_lines = 5
show_arguments = false
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.project.default_project_id, Some(7));
        assert_eq!(cfg.chat.max_view_lines, 5);
        assert!(!cfg.chat.show_arguments);
        // Untouched keys keep their defaults
        assert_eq!(cfg.chat.preview_interval_ms, 500);
        assert_eq!(cfg.server.request_timeout_secs, 60);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[server\nbase_url = ").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/config.toml");

        let mut cfg = AppConfig::default();
        cfg.server.username = "admin".to_string();
        cfg.project.default_project_id = Some(42);
        cfg.chat.transcript_enabled = false;
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.username, "admin");
        assert_eq!(loaded.project.default_project_id, Some(42));
        assert!(!loaded.chat.transcript_enabled);
        assert!(loaded.has_credentials());
    }

    #[test]
    fn explicit_project_wins_over_default() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.project_id(None), None);
        cfg.project.default_project_id = Some(3);
        assert_eq!(cfg.project_id(None), Some(3));
        assert_eq!(cfg.project_id(Some(9)), Some(9));
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[server]
base_url = "http://from-file:8100"
api_token = "file-token"
"#,
        )
        .unwrap();

        // SAFETY: the LEDGERPILOT_* variables are only touched by this test.
        unsafe {
            env::set_var("LEDGERPILOT_URL", "http://from-env:9000");
            env::set_var("LEDGERPILOT_TOKEN", "env-token");
        }
        let cfg = AppConfig::load_from(&path).unwrap();
        unsafe {
            env::remove_var("LEDGERPILOT_URL");
            env::remove_var("LEDGERPILOT_TOKEN");
        }

        assert_eq!(cfg.server.base_url, "http://from-env:9000");
        assert_eq!(cfg.server.api_token, "env-token");
    }
}
