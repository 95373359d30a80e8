use std::io::{self, Write};

use crossterm::queue;
use crossterm::style::{Color, Stylize};
use crossterm::terminal::{Clear, ClearType};

use ledgerpilot_chat::{Change, ChatSession, ToolPhase, parse_partial};
use ledgerpilot_tools::{LineStyle, Tone, ToolKind, ToolView, render_call, render_update};

/// Prints a chat turn incrementally as the session changes.
pub(crate) struct Renderer<W: Write> {
    out: W,
    color: bool,
    /// Output is a terminal, so transient lines can be redrawn in place.
    interactive: bool,
    show_arguments: bool,
    max_view_lines: usize,
    /// Assistant text is being streamed on the current line.
    in_text: bool,
    /// A transient preview line is on screen and must be erased before the
    /// next real output.
    status_active: bool,
    last_view: Option<ToolView>,
}

impl<W: Write> Renderer<W> {
    pub(crate) fn new(
        out: W,
        color: bool,
        interactive: bool,
        show_arguments: bool,
        max_view_lines: usize,
    ) -> Self {
        Self {
            out,
            color,
            interactive,
            show_arguments,
            max_view_lines,
            in_text: false,
            status_active: false,
            last_view: None,
        }
    }

    /// Most recently completed tool view, for `/copy`.
    pub(crate) fn last_view(&self) -> Option<&ToolView> {
        self.last_view.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn clear_status(&mut self) -> io::Result<()> {
        if self.status_active {
            write!(self.out, "\r")?;
            queue!(self.out, Clear(ClearType::CurrentLine))?;
            self.status_active = false;
        }
        Ok(())
    }

    fn end_text(&mut self) -> io::Result<()> {
        if self.in_text {
            writeln!(self.out)?;
            self.in_text = false;
        }
        Ok(())
    }

    pub(crate) fn on_change(&mut self, session: &ChatSession, change: &Change) -> io::Result<()> {
        match change {
            Change::Text { delta } => {
                self.clear_status()?;
                if !self.in_text {
                    let prefix = self.paint("assistant> ", Color::Cyan);
                    write!(self.out, "{prefix}")?;
                    self.in_text = true;
                }
                write!(self.out, "{delta}")?;
            }
            Change::Tool {
                tool_call_id,
                phase,
            } => {
                let Some(call) = session.find_tool_call(tool_call_id) else {
                    return Ok(());
                };
                match phase {
                    ToolPhase::Start => {
                        self.clear_status()?;
                        self.end_text()?;
                        let line = self.paint(&format!("⚙ {}", call.name), Color::DarkGrey);
                        writeln!(self.out, "{line}")?;
                    }
                    // Argument deltas are shown by the preview ticker.
                    ToolPhase::Update => {}
                    ToolPhase::Execute => {
                        let view = render_call(call, self.max_view_lines);
                        // A bare title would be repeated by the result view.
                        if self.show_arguments && !view.lines.is_empty() {
                            self.clear_status()?;
                            self.end_text()?;
                            self.print_view(&view)?;
                        }
                    }
                    ToolPhase::Result => {
                        self.clear_status()?;
                        self.end_text()?;
                        let view = render_call(call, self.max_view_lines);
                        self.print_view(&view)?;
                        self.last_view = Some(view);
                    }
                }
            }
            Change::StepsExhausted { message } => {
                self.clear_status()?;
                self.end_text()?;
                let text = match message {
                    Some(message) => format!("step limit reached: {message}"),
                    None => "step limit reached".to_string(),
                };
                let line = self.paint(
                    &format!("{text}; send a follow-up to let the assistant continue"),
                    Color::Yellow,
                );
                writeln!(self.out, "{line}")?;
            }
            Change::Ignored => {}
        }
        self.out.flush()
    }

    /// Re-parse the running tool's accumulated arguments and show a one-line
    /// progress preview.  Only drawn on a terminal.
    pub(crate) fn preview(&mut self, session: &ChatSession) -> io::Result<()> {
        if !self.interactive || self.in_text {
            return Ok(());
        }
        let (Some(active), Some(arguments)) = (session.active_tool(), session.active_arguments())
        else {
            return Ok(());
        };
        let kind = ToolKind::from_name(&active.name);
        let view = render_update(&kind, &parse_partial(arguments).value);
        let text = self.paint(
            &format!("⋯ {} ({} bytes)", view.title, arguments.len()),
            Color::DarkGrey,
        );

        write!(self.out, "\r")?;
        queue!(self.out, Clear(ClearType::CurrentLine))?;
        write!(self.out, "{text}")?;
        self.status_active = true;
        self.out.flush()
    }

    pub(crate) fn print_view(&mut self, view: &ToolView) -> io::Result<()> {
        let title_color = match view.tone {
            Tone::Running => Color::Yellow,
            Tone::Success => Color::Green,
            Tone::Error => Color::Red,
        };
        let title = self.paint(&view.title, title_color);
        writeln!(self.out, "  {title}")?;
        for line in &view.lines {
            let (marker, color) = match line.style {
                LineStyle::Plain => ("", Color::Reset),
                LineStyle::Code => ("", Color::Cyan),
                LineStyle::Added => ("+ ", Color::Green),
                LineStyle::Removed => ("- ", Color::Red),
                LineStyle::Muted => ("", Color::DarkGrey),
                LineStyle::Error => ("", Color::Red),
            };
            let text = self.paint(&format!("{marker}{}", line.text), color);
            writeln!(self.out, "    {text}")?;
        }
        Ok(())
    }

    /// Close the turn: terminate streamed text and erase any preview.
    pub(crate) fn finish_turn(&mut self) -> io::Result<()> {
        self.clear_status()?;
        self.end_text()?;
        self.out.flush()
    }

    /// Unstyled output line.
    pub(crate) fn line(&mut self, text: &str) -> io::Result<()> {
        self.finish_turn()?;
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    pub(crate) fn notice(&mut self, text: &str) -> io::Result<()> {
        self.finish_turn()?;
        let line = self.paint(text, Color::DarkGrey);
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    pub(crate) fn error(&mut self, text: &str) -> io::Result<()> {
        self.finish_turn()?;
        let line = self.paint(&format!("error: {text}"), Color::Red);
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerpilot_chat::{StreamEvent, ToolEvent};
    use serde_json::{Value, json};

    fn plain() -> Renderer<Vec<u8>> {
        Renderer::new(Vec::new(), false, false, true, 20)
    }

    fn apply_all(session: &mut ChatSession, renderer: &mut Renderer<Vec<u8>>, events: Vec<StreamEvent>) {
        let mut hook = |_: &str, _: &Value| {};
        for event in events {
            let change = session.apply(event, &mut hook);
            renderer.on_change(session, &change).unwrap();
        }
        renderer.finish_turn().unwrap();
    }

    #[test]
    fn text_and_tool_result_render_in_order() {
        let mut session = ChatSession::new();
        let mut renderer = plain();
        session.submit("read it");
        apply_all(
            &mut session,
            &mut renderer,
            vec![
                StreamEvent::Llm {
                    content: "Reading".to_string(),
                },
                StreamEvent::ToolStart(ToolEvent {
                    name: "read_file".to_string(),
                    ..ToolEvent::new("1")
                }),
                StreamEvent::ToolExecute(ToolEvent {
                    args: Some(json!({"path": "a.go"})),
                    ..ToolEvent::new("1")
                }),
                StreamEvent::ToolResult(ToolEvent {
                    result: Some(json!("package main")),
                    ..ToolEvent::new("1")
                }),
            ],
        );

        assert_eq!(renderer.last_view().unwrap().title, "Read a.go");
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(
            output,
            "assistant> Reading\n⚙ read_file\n  Read a.go\n    package main\n"
        );
    }

    #[test]
    fn failed_tool_renders_error_lines() {
        let mut session = ChatSession::new();
        let mut renderer = plain();
        apply_all(
            &mut session,
            &mut renderer,
            vec![
                StreamEvent::ToolStart(ToolEvent {
                    name: "delete_file".to_string(),
                    ..ToolEvent::new("d")
                }),
                StreamEvent::ToolResult(ToolEvent {
                    error: Some("not found".to_string()),
                    ..ToolEvent::new("d")
                }),
            ],
        );
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(output.ends_with("  Delete …\n    not found\n"));
    }

    #[test]
    fn preview_is_skipped_without_a_terminal() {
        let mut session = ChatSession::new();
        let mut renderer = plain();
        let mut hook = |_: &str, _: &Value| {};
        session.apply(
            StreamEvent::ToolStart(ToolEvent {
                name: "write_file".to_string(),
                ..ToolEvent::new("w")
            }),
            &mut hook,
        );
        renderer.preview(&session).unwrap();
        assert!(renderer.into_inner().is_empty());
    }

    #[test]
    fn steps_exhausted_is_announced() {
        let mut session = ChatSession::new();
        let mut renderer = plain();
        apply_all(
            &mut session,
            &mut renderer,
            vec![StreamEvent::MaxStepsReached { message: None }],
        );
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(output.starts_with("step limit reached; send a follow-up"));
    }

    #[test]
    fn steps_exhausted_shows_server_message() {
        let mut session = ChatSession::new();
        let mut renderer = plain();
        apply_all(
            &mut session,
            &mut renderer,
            vec![StreamEvent::MaxStepsReached {
                message: Some("used all 25 steps".to_string()),
            }],
        );
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(output.starts_with("step limit reached: used all 25 steps; send"));
    }

    #[test]
    fn execute_view_with_body_is_printed() {
        let mut session = ChatSession::new();
        let mut renderer = plain();
        apply_all(
            &mut session,
            &mut renderer,
            vec![
                StreamEvent::ToolStart(ToolEvent {
                    name: "run_terminal_cmd".to_string(),
                    ..ToolEvent::new("r")
                }),
                StreamEvent::ToolExecute(ToolEvent {
                    args: Some(json!({"command": "go test"})),
                    ..ToolEvent::new("r")
                }),
            ],
        );
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(output, "⚙ run_terminal_cmd\n  Run go test\n    $ go test\n");
    }

    #[test]
    fn preview_draws_on_a_terminal_without_color() {
        let mut session = ChatSession::new();
        let mut renderer = Renderer::new(Vec::new(), false, true, true, 20);
        let mut hook = |_: &str, _: &Value| {};
        session.apply(
            StreamEvent::ToolStart(ToolEvent {
                name: "write_file".to_string(),
                ..ToolEvent::new("w")
            }),
            &mut hook,
        );
        session.apply(
            StreamEvent::ToolUpdate(ToolEvent {
                arguments: Some("{\"path\":\"asset.go\"".to_string()),
                ..ToolEvent::new("w")
            }),
            &mut hook,
        );
        renderer.preview(&session).unwrap();
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(output.contains("⋯ Write asset.go (18 bytes)"));
        assert!(!output.contains("\u{1b}[38"));
    }
}
