use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Lifecycle phase of a single tool invocation.
///
/// `Start` → zero or more `Update` → `Execute` → `Result`.  `Result` is
/// terminal: nothing mutates a tool call once it has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Start,
    Update,
    Execute,
    Result,
}

impl ToolPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Update => "update",
            Self::Execute => "execute",
            Self::Result => "result",
        }
    }
}

/// Payload shared by every `tool_*` envelope.
///
/// Only `toolCallID` is mandatory.  `arguments` carries a raw fragment of the
/// argument JSON text (`tool_update`), `args` the finalized argument object
/// (`tool_execute`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(rename = "toolCallID")]
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
}

impl ToolEvent {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ..Self::default()
        }
    }
}

/// One decoded `data:` envelope of the chat stream, routed by its `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Streamed assistant text.
    Llm {
        #[serde(default)]
        content: String,
    },
    ToolStart(ToolEvent),
    ToolUpdate(ToolEvent),
    ToolExecute(ToolEvent),
    ToolResult(ToolEvent),
    /// The orchestration loop ran out of steps before the model finished.
    MaxStepsReached {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

const KNOWN_TYPES: &[&str] = &[
    "llm",
    "tool_start",
    "tool_update",
    "tool_execute",
    "tool_result",
    "max_steps_reached",
];

/// Why a `data:` payload could not be turned into a [`StreamEvent`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON, or a known envelope with the wrong shape.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Valid JSON whose `type` this client does not handle.
    #[error("unknown event type '{0}'")]
    UnknownType(String),
}

impl StreamEvent {
    /// Decode one `data:` payload.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(payload)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownType(kind));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn phase(&self) -> Option<ToolPhase> {
        match self {
            Self::ToolStart(_) => Some(ToolPhase::Start),
            Self::ToolUpdate(_) => Some(ToolPhase::Update),
            Self::ToolExecute(_) => Some(ToolPhase::Execute),
            Self::ToolResult(_) => Some(ToolPhase::Result),
            Self::Llm { .. } | Self::MaxStepsReached { .. } => None,
        }
    }

    pub fn tool_event(&self) -> Option<&ToolEvent> {
        match self {
            Self::ToolStart(ev)
            | Self::ToolUpdate(ev)
            | Self::ToolExecute(ev)
            | Self::ToolResult(ev) => Some(ev),
            Self::Llm { .. } | Self::MaxStepsReached { .. } => None,
        }
    }
}

/// Accept a string, or any other JSON value rendered as its JSON text.
/// Servers occasionally send `error` as an object and `arguments` as an
/// already-parsed object; neither should cost us the whole event.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_llm_token() {
        let ev = StreamEvent::decode(r#"{"type":"llm","content":"Hello"}"#).unwrap();
        assert_eq!(
            ev,
            StreamEvent::Llm {
                content: "Hello".to_string()
            }
        );
        assert!(ev.phase().is_none());
    }

    #[test]
    fn decodes_tool_update_with_wire_field_names() {
        let ev = StreamEvent::decode(
            r#"{"type":"tool_update","toolCallID":"call_1","name":"write_file","arguments":"{\"pa"}"#,
        )
        .unwrap();
        assert_eq!(ev.phase(), Some(ToolPhase::Update));
        let tool = ev.tool_event().unwrap();
        assert_eq!(tool.tool_call_id, "call_1");
        assert_eq!(tool.name, "write_file");
        assert_eq!(tool.arguments.as_deref(), Some("{\"pa"));
    }

    #[test]
    fn name_is_optional_on_tool_events() {
        let ev = StreamEvent::decode(
            r#"{"type":"tool_result","toolCallID":"1","result":{"ok":true}}"#,
        )
        .unwrap();
        let tool = ev.tool_event().unwrap();
        assert!(tool.name.is_empty());
        assert_eq!(tool.result, Some(json!({"ok": true})));
        assert!(tool.error.is_none());
    }

    #[test]
    fn non_string_error_is_kept_as_json_text() {
        let ev = StreamEvent::decode(
            r#"{"type":"tool_result","toolCallID":"1","error":{"code":5}}"#,
        )
        .unwrap();
        assert_eq!(
            ev.tool_event().unwrap().error.as_deref(),
            Some(r#"{"code":5}"#)
        );
    }

    #[test]
    fn null_error_means_no_error() {
        let ev = StreamEvent::decode(
            r#"{"type":"tool_result","toolCallID":"1","result":"done","error":null}"#,
        )
        .unwrap();
        assert!(ev.tool_event().unwrap().error.is_none());
    }

    #[test]
    fn max_steps_tolerates_extra_fields() {
        let ev = StreamEvent::decode(r#"{"type":"max_steps_reached","steps":25}"#).unwrap();
        assert_eq!(ev, StreamEvent::MaxStepsReached { message: None });
    }

    #[test]
    fn unknown_type_is_reported_separately() {
        let err = StreamEvent::decode(r#"{"type":"heartbeat"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ref kind) if kind == "heartbeat"));
        assert_eq!(err.to_string(), "unknown event type 'heartbeat'");
    }

    #[test]
    fn malformed_error_is_a_std_error() {
        let err = StreamEvent::decode("[1,").unwrap_err();
        assert!(err.to_string().starts_with("malformed event: "));
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
    }

    #[test]
    fn missing_tool_call_id_is_malformed() {
        let err = StreamEvent::decode(r#"{"type":"tool_start","name":"read_file"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = StreamEvent::decode("{not valid json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
