mod abort;
mod api;
mod error;
pub mod types;

pub use abort::{AbortHandle, AbortSignal, abort_pair};
pub use api::ApiClient;
pub use error::ApiError;
pub use types::{ChatRequest, Commit, Conversation, ConversationMessage, FileContent, FileEntry};
