mod render;
mod view;

pub use render::{render_call, render_execute, render_result, render_update};
pub use view::{LineStyle, Tone, ToolView, ViewLine};

// ── Tool registry ────────────────────────────────────────────────────────────

/// Tools the chaincode assistant is known to call.
///
/// Anything else lands in [`ToolKind::Other`] and is rendered as generic
/// JSON, so a new server-side tool never breaks the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ReadFile,
    WriteFile,
    EditFile,
    DeleteFile,
    ListDir,
    FileSearch,
    GrepSearch,
    RunTerminalCmd,
    Other(String),
}

impl ToolKind {
    pub const KNOWN: [ToolKind; 8] = [
        Self::ReadFile,
        Self::WriteFile,
        Self::EditFile,
        Self::DeleteFile,
        Self::ListDir,
        Self::FileSearch,
        Self::GrepSearch,
        Self::RunTerminalCmd,
    ];

    pub fn from_name(name: &str) -> Self {
        match name {
            "read_file" => Self::ReadFile,
            "write_file" => Self::WriteFile,
            "edit_file" => Self::EditFile,
            "delete_file" => Self::DeleteFile,
            "list_dir" => Self::ListDir,
            "file_search" => Self::FileSearch,
            "grep_search" => Self::GrepSearch,
            "run_terminal_cmd" => Self::RunTerminalCmd,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::EditFile => "edit_file",
            Self::DeleteFile => "delete_file",
            Self::ListDir => "list_dir",
            Self::FileSearch => "file_search",
            Self::GrepSearch => "grep_search",
            Self::RunTerminalCmd => "run_terminal_cmd",
            Self::Other(name) => name,
        }
    }

    /// Whether a successful call may have changed project files, so the host
    /// should reload its file listing.  Terminal commands count: they can
    /// run code generators or `go mod tidy`.
    pub fn mutates_files(&self) -> bool {
        matches!(
            self,
            Self::WriteFile | Self::EditFile | Self::DeleteFile | Self::RunTerminalCmd
        )
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
