/// Overall colouring of a tool view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Arguments still arriving or the tool is executing.
    Running,
    Success,
    Error,
}

/// Presentation of a single body line.  The terminal front end maps these to
/// colours; nothing here knows about escape codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Plain,
    Code,
    Added,
    Removed,
    Muted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewLine {
    pub style: LineStyle,
    pub text: String,
}

impl ViewLine {
    pub fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

/// Rendered form of one tool invocation at one lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolView {
    pub title: String,
    pub tone: Tone,
    pub lines: Vec<ViewLine>,
}

impl ToolView {
    pub fn new(title: impl Into<String>, tone: Tone) -> Self {
        Self {
            title: title.into(),
            tone,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, style: LineStyle, text: impl Into<String>) {
        self.lines.push(ViewLine::new(style, text));
    }

    /// Push every line of `text` with the same style.
    pub fn push_block(&mut self, style: LineStyle, text: &str) {
        for line in text.lines() {
            self.push(style, line);
        }
    }

    pub fn with_block(mut self, style: LineStyle, text: &str) -> Self {
        self.push_block(style, text);
        self
    }

    /// Keep at most `max_lines` body lines, replacing the rest with a muted
    /// count.  `0` disables truncation.
    pub fn truncate(&mut self, max_lines: usize) {
        if max_lines == 0 || self.lines.len() <= max_lines {
            return;
        }
        let hidden = self.lines.len() - max_lines;
        self.lines.truncate(max_lines);
        self.push(LineStyle::Muted, format!("… {hidden} more lines"));
    }

    /// Title and body as plain text, for the clipboard.
    pub fn plain_text(&self) -> String {
        let mut out = self.title.clone();
        for line in &self.lines {
            out.push('\n');
            match line.style {
                LineStyle::Added => out.push_str("+ "),
                LineStyle::Removed => out.push_str("- "),
                _ => {}
            }
            out.push_str(&line.text);
        }
        out
    }
}
