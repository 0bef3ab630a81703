//! Chat message model and conversation history.

pub mod history;
pub mod message;

pub use history::{ChatHistory, HistoryPolicy};
pub use message::{
    AuthorRole, ChatMessage, ContentItem, FunctionCallContent, FunctionResultContent,
    ImageContent, Usage,
};
