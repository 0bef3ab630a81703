//! Provider wire formats.
//!
//! An adapter is a pure, stateless transform between a [`ChatHistory`] and the
//! message shape of one provider. Each adapter declares whether merging histories
//! requires a common prefix.

use crate::chat::{ChatHistory, ChatMessage, HistoryPolicy};
use crate::error::ConversionError;

pub mod gemini;
pub mod openai;
pub mod sse;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Conversion between the common chat model and a provider wire format.
pub trait ChatMessageAdapter {
    /// Wire representation of a whole conversation.
    type Wire;

    /// Raw provider response.
    type Response;

    /// History merge policy of the provider.
    fn history_policy(&self) -> HistoryPolicy;

    /// Converts a history into wire messages.
    fn to_wire(&self, history: &ChatHistory) -> Result<Self::Wire, ConversionError>;

    /// Converts wire messages back into chat messages.
    fn from_wire(&self, wire: &Self::Wire) -> Result<Vec<ChatMessage>, ConversionError>;

    /// Converts a provider response into assistant messages.
    fn from_response(
        &self,
        response: &Self::Response,
    ) -> Result<Vec<ChatMessage>, ConversionError>;
}
