mod event;
pub mod repair;
mod session;
pub mod sse;
pub mod transcript;

pub use event::{DecodeError, StreamEvent, ToolEvent, ToolPhase};
pub use repair::{ParseQuality, PartialJson, parse_partial};
pub use session::{
    Change, ChatMessage, ChatSession, HistoryMessage, MessagePart, Role, ToolCall, ToolExecution,
    ToolResultHook, ToolStatus,
};
pub use sse::{DecodeStats, EventDecoder, TextDecoder};
pub use transcript::{ToolSummary, Transcript, TurnRecord};
