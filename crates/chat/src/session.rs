//! Conversation state and the stream event reducer.
//!
//! [`ChatSession`] owns every message of the conversation and is mutated only
//! through [`ChatSession::apply`] and the turn lifecycle methods (`submit`,
//! `finish`, `abort`, `fail`).  Rendering code reads it through shared
//! references.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::event::{StreamEvent, ToolEvent, ToolPhase};
use crate::repair::{ParseQuality, parse_partial};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Started,
    Streaming,
    Executing,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Streaming => "streaming",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Merged state of one tool invocation inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub name: String,
    pub status: ToolStatus,
    /// Raw accumulated argument text.  This is what the model sent; the
    /// parsed views below are derived from it and may lag or differ.
    pub arguments: String,
    /// Best-effort parse of `arguments`, refreshed on every change.
    pub parsed: Value,
    pub parse_quality: ParseQuality,
    /// Most recent parse of `arguments` that needed no repair.
    pub last_complete: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(tool_call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            status: ToolStatus::Started,
            arguments: String::new(),
            parsed: Value::Object(Default::default()),
            parse_quality: ParseQuality::Complete,
            last_complete: None,
            result: None,
            error: None,
        }
    }

    pub fn execution(&self) -> ToolExecution {
        ToolExecution {
            tool_call_id: self.tool_call_id.clone(),
            name: self.name.clone(),
            status: self.status,
            error: self.error.clone(),
            result: self.result.clone(),
        }
    }

    /// Fold one argument fragment into the accumulated text.
    ///
    /// Placeholder text (empty or `{}`) is replaced by the first real
    /// fragment; after that fragments are concatenated verbatim.  The
    /// accumulated text is never rebuilt from a parsed value, since a partial
    /// token would be lost on the way.
    fn merge_delta(&mut self, delta: &str) {
        if is_placeholder(&self.arguments) {
            self.arguments = delta.to_string();
        } else {
            self.arguments.push_str(delta);
        }
        self.reparse();
    }

    fn replace_arguments(&mut self, args: Value) {
        self.arguments = args.to_string();
        self.parsed = args.clone();
        self.parse_quality = ParseQuality::Complete;
        self.last_complete = Some(args);
    }

    fn reparse(&mut self) {
        if is_placeholder(&self.arguments) {
            self.parsed = Value::Object(Default::default());
            self.parse_quality = ParseQuality::Complete;
            return;
        }
        let partial = parse_partial(&self.arguments);
        if partial.is_complete() {
            self.last_complete = Some(partial.value.clone());
        }
        self.parse_quality = partial.quality;
        self.parsed = partial.value;
    }

    fn adopt_name(&mut self, name: &str) {
        if !name.is_empty() {
            self.name = name.to_string();
        }
    }
}

fn is_placeholder(arguments: &str) -> bool {
    let trimmed = arguments.trim();
    trimmed.is_empty() || trimmed == "{}"
}

/// Projection of the tool that is currently running, for progress
/// indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub name: String,
    pub status: ToolStatus,
    pub error: Option<String>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { content: String },
    Tool(ToolCall),
}

impl MessagePart {
    pub fn as_tool(&self) -> Option<&ToolCall> {
        match self {
            Self::Tool(call) => Some(call),
            Self::Text { .. } => None,
        }
    }

    fn as_tool_mut(&mut self) -> Option<&mut ToolCall> {
        match self {
            Self::Tool(call) => Some(call),
            Self::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
    /// Set once the stream that produced this message has ended.  Sealed
    /// messages are never mutated again.
    #[serde(skip)]
    sealed: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::Text {
                content: content.into(),
            }],
            sealed: true,
        }
    }

    /// A finished assistant message, e.g. restored from server history.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![MessagePart::Text {
                content: content.into(),
            }],
            sealed: true,
        }
    }

    fn open_assistant() -> Self {
        Self {
            role: Role::Assistant,
            parts: Vec::new(),
            sealed: false,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { content } => Some(content.as_str()),
                MessagePart::Tool(_) => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(MessagePart::as_tool)
    }

    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCall> {
        self.tool_calls()
            .find(|call| call.tool_call_id == tool_call_id)
    }
}

/// `{role, content}` entry of the chat request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

/// Receives successful tool results.  The host uses this to refresh whatever
/// the tool may have changed (file trees, open file contents).
pub trait ToolResultHook {
    fn on_tool_result(&mut self, name: &str, result: &Value);
}

impl<F> ToolResultHook for F
where
    F: FnMut(&str, &Value),
{
    fn on_tool_result(&mut self, name: &str, result: &Value) {
        self(name, result)
    }
}

/// What a single [`ChatSession::apply`] call changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Text { delta: String },
    Tool {
        tool_call_id: String,
        phase: ToolPhase,
    },
    /// The server stopped at its step budget, optionally saying why.
    StepsExhausted { message: Option<String> },
    Ignored,
}

#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    is_loading: bool,
    active_tool: Option<ToolExecution>,
    steps_exhausted: bool,
    last_error: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from finished messages, e.g. a conversation loaded from the
    /// server.
    pub fn with_history(messages: Vec<ChatMessage>) -> Self {
        let messages = messages
            .into_iter()
            .map(|mut message| {
                message.sealed = true;
                message
            })
            .collect();
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn active_tool(&self) -> Option<&ToolExecution> {
        self.active_tool.as_ref()
    }

    /// Raw accumulated arguments of the running tool, for previews.
    pub fn active_arguments(&self) -> Option<&str> {
        let active = self.active_tool.as_ref()?;
        self.find_tool_call(&active.tool_call_id)
            .map(|call| call.arguments.as_str())
    }

    pub fn steps_exhausted(&self) -> bool {
        self.steps_exhausted
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Look a tool call up in the most recent assistant message.
    pub fn find_tool_call(&self, tool_call_id: &str) -> Option<&ToolCall> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .and_then(|message| message.tool_call(tool_call_id))
    }

    /// Start a new turn: record the user message and return the history to
    /// send with the chat request.
    pub fn submit(&mut self, content: impl Into<String>) -> Vec<HistoryMessage> {
        self.seal_open_message();
        self.messages.push(ChatMessage::user(content));
        self.is_loading = true;
        self.active_tool = None;
        self.steps_exhausted = false;
        self.last_error = None;

        self.messages
            .iter()
            .filter_map(|message| {
                let content = message.text();
                if content.trim().is_empty() {
                    return None;
                }
                Some(HistoryMessage {
                    role: message.role,
                    content,
                })
            })
            .collect()
    }

    /// Fold one stream event into the conversation.
    pub fn apply<H>(&mut self, event: StreamEvent, hook: &mut H) -> Change
    where
        H: ToolResultHook + ?Sized,
    {
        match event {
            StreamEvent::Llm { content } => self.apply_text(content),
            StreamEvent::ToolStart(ev) => self.apply_tool(ToolPhase::Start, ev, hook),
            StreamEvent::ToolUpdate(ev) => self.apply_tool(ToolPhase::Update, ev, hook),
            StreamEvent::ToolExecute(ev) => self.apply_tool(ToolPhase::Execute, ev, hook),
            StreamEvent::ToolResult(ev) => self.apply_tool(ToolPhase::Result, ev, hook),
            StreamEvent::MaxStepsReached { message } => {
                debug!("assistant stopped at the step budget");
                self.active_tool = None;
                self.steps_exhausted = true;
                Change::StepsExhausted {
                    message: message.filter(|m| !m.trim().is_empty()),
                }
            }
        }
    }

    /// The stream ended normally.
    pub fn finish(&mut self) {
        self.end_turn();
    }

    /// The user stopped the stream.  Not an error.
    pub fn abort(&mut self) {
        debug!("turn aborted");
        self.end_turn();
    }

    /// The stream failed; the error is kept for display.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.end_turn();
        self.last_error = Some(error.into());
    }

    /// Drop every message and any in-flight state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn end_turn(&mut self) {
        self.is_loading = false;
        self.active_tool = None;
        self.seal_open_message();
    }

    fn seal_open_message(&mut self) {
        if let Some(message) = self.messages.last_mut() {
            message.sealed = true;
        }
    }

    fn apply_text(&mut self, content: String) -> Change {
        if content.is_empty() {
            return Change::Ignored;
        }
        let message = open_assistant(&mut self.messages);
        match message.parts.last_mut() {
            Some(MessagePart::Text { content: tail }) => tail.push_str(&content),
            _ => message.parts.push(MessagePart::Text {
                content: content.clone(),
            }),
        }
        Change::Text { delta: content }
    }

    fn apply_tool<H>(&mut self, phase: ToolPhase, event: ToolEvent, hook: &mut H) -> Change
    where
        H: ToolResultHook + ?Sized,
    {
        if event.tool_call_id.is_empty() {
            debug!(phase = phase.as_str(), "tool event without toolCallID ignored");
            return Change::Ignored;
        }

        let message = open_assistant(&mut self.messages);
        let id = event.tool_call_id.as_str();
        if message.tool_call(id).is_none() {
            message
                .parts
                .push(MessagePart::Tool(ToolCall::new(id, event.name.clone())));
        }
        let Some(call) = message
            .parts
            .iter_mut()
            .rev()
            .find_map(|part| part.as_tool_mut().filter(|call| call.tool_call_id == id))
        else {
            return Change::Ignored;
        };

        if call.status.is_terminal() {
            debug!(
                tool_call_id = id,
                phase = phase.as_str(),
                "event after tool result ignored"
            );
            return Change::Ignored;
        }

        call.adopt_name(&event.name);
        trace!(tool_call_id = id, phase = phase.as_str(), tool = %call.name, "tool event");

        match phase {
            ToolPhase::Start => {
                if let Some(arguments) = event.arguments.as_deref() {
                    if !is_placeholder(arguments) {
                        call.arguments = arguments.to_string();
                        call.reparse();
                    }
                }
                self.active_tool = Some(call.execution());
            }
            ToolPhase::Update => {
                if let Some(delta) = event.arguments.as_deref() {
                    call.merge_delta(delta);
                } else if let Some(args) = event.args {
                    // A full snapshot rather than a fragment.
                    call.replace_arguments(args);
                }
                call.status = ToolStatus::Streaming;
                self.active_tool = Some(call.execution());
            }
            ToolPhase::Execute => {
                if let Some(args) = event.args {
                    call.replace_arguments(args);
                }
                call.status = ToolStatus::Executing;
                self.active_tool = Some(call.execution());
            }
            ToolPhase::Result => {
                call.result = event.result;
                call.error = event.error.filter(|error| !error.is_empty());
                call.status = if call.error.is_some() {
                    ToolStatus::Failed
                } else {
                    ToolStatus::Completed
                };
                self.active_tool = None;

                if call.error.is_none() {
                    let result = call.result.clone().unwrap_or(Value::Null);
                    hook.on_tool_result(&call.name, &result);
                }
            }
        }

        Change::Tool {
            tool_call_id: event.tool_call_id,
            phase,
        }
    }
}

/// The assistant message currently receiving stream events, created if the
/// conversation does not end with one.
fn open_assistant(messages: &mut Vec<ChatMessage>) -> &mut ChatMessage {
    let reuse = matches!(
        messages.last(),
        Some(message) if message.role == Role::Assistant && !message.sealed
    );
    if !reuse {
        messages.push(ChatMessage::open_assistant());
    }
    let last = messages.len() - 1;
    &mut messages[last]
}
