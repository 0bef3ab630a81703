//! Provider-agnostic chat messages.

use crate::function::{join_full_name, split_full_name, value_to_text};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::AddAssign;
use std::str::FromStr;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    /// Instructions for the model.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// Results of tool calls.
    Tool,
}

impl AuthorRole {
    /// Returns the role as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorRole::System => "system",
            AuthorRole::User => "user",
            AuthorRole::Assistant => "assistant",
            AuthorRole::Tool => "tool",
        }
    }
}

impl FromStr for AuthorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(AuthorRole::System),
            "user" => Ok(AuthorRole::User),
            "assistant" => Ok(AuthorRole::Assistant),
            "tool" => Ok(AuthorRole::Tool),
            _ => Err(s.to_owned()),
        }
    }
}

impl std::fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image referenced by URI or carried inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Remote location of the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Raw image bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// MIME type, e.g. `image/png`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ImageContent {
    /// Creates an image referenced by URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            data: None,
            mime_type: None,
        }
    }

    /// Creates an inline image.
    pub fn from_data(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            uri: None,
            data: Some(data),
            mime_type: Some(mime_type.into()),
        }
    }
}

/// A model request to run a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallContent {
    /// Call identifier used to correlate the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Plugin name derived from the full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    /// Function name.
    pub function_name: String,
    /// Arguments as a key-value bag.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl FunctionCallContent {
    /// Creates a call from a full name.
    pub fn new(id: impl Into<String>, full_name: &str, arguments: Map<String, Value>) -> Self {
        let (plugin_name, function_name) = split_full_name(full_name);
        Self {
            id: Some(id.into()),
            plugin_name: plugin_name.map(|s| s.to_owned()),
            function_name: function_name.to_owned(),
            arguments,
        }
    }

    /// Returns the full name `plugin-function`.
    #[inline]
    pub fn full_name(&self) -> String {
        join_full_name(self.plugin_name.as_deref(), &self.function_name)
    }
}

/// The outcome of a function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResultContent {
    /// Identifier of the originating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Plugin name of the called function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    /// Function name of the called function.
    #[serde(default)]
    pub function_name: String,
    /// The result value, `None` when no result was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl FunctionResultContent {
    /// Creates the result of a call.
    pub fn for_call(call: &FunctionCallContent, result: impl Into<Value>) -> Self {
        Self {
            call_id: call.id.clone(),
            plugin_name: call.plugin_name.clone(),
            function_name: call.function_name.clone(),
            result: Some(result.into()),
        }
    }

    /// Returns the full name `plugin-function`.
    #[inline]
    pub fn full_name(&self) -> String {
        join_full_name(self.plugin_name.as_deref(), &self.function_name)
    }

    /// Returns the result as text, or `None` if there is no non-empty result.
    pub fn result_text(&self) -> Option<String> {
        self.result
            .as_ref()
            .map(value_to_text)
            .filter(|text| !text.is_empty())
    }
}

/// One item of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// A text segment.
    Text {
        /// The text.
        text: String,
    },
    /// An image.
    Image(ImageContent),
    /// A tool-call request.
    FunctionCall(FunctionCallContent),
    /// A tool-call result.
    FunctionResult(FunctionResultContent),
}

impl ContentItem {
    /// Creates a text item.
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the request.
    pub prompt_tokens: u64,
    /// Tokens in the response.
    pub completion_tokens: u64,
}

impl Usage {
    /// Returns the total number of tokens.
    #[inline]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// One authored turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: AuthorRole,
    /// Ordered content items.
    #[serde(default)]
    pub items: Vec<ContentItem>,
    /// Model that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Token usage of the producing call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Opaque per-call metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ChatMessage {
    /// Creates a message from content items.
    pub fn new(role: AuthorRole, items: Vec<ContentItem>) -> Self {
        Self {
            role,
            items,
            model_id: None,
            usage: None,
            metadata: Map::new(),
        }
    }

    /// Creates a text message.
    pub fn text(role: AuthorRole, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentItem::text(text)])
    }

    /// Creates a system message.
    #[inline]
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(AuthorRole::System, text)
    }

    /// Creates a user message.
    #[inline]
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(AuthorRole::User, text)
    }

    /// Creates an assistant message with a plain answer.
    #[inline]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(AuthorRole::Assistant, text)
    }

    /// Creates an assistant message that only carries tool calls.
    pub fn function_calls(calls: Vec<FunctionCallContent>) -> Self {
        Self::new(
            AuthorRole::Assistant,
            calls.into_iter().map(ContentItem::FunctionCall).collect(),
        )
    }

    /// Creates a tool message carrying one result.
    pub fn tool_result(result: FunctionResultContent) -> Self {
        Self::new(AuthorRole::Tool, vec![ContentItem::FunctionResult(result)])
    }

    /// Sets the model id.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Sets the token usage.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Returns the concatenated text items, or `None` if there are none.
    pub fn content(&self) -> Option<String> {
        let texts = self
            .items
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// Iterates over tool-call requests.
    pub fn calls(&self) -> impl Iterator<Item = &FunctionCallContent> {
        self.items.iter().filter_map(|item| match item {
            ContentItem::FunctionCall(call) => Some(call),
            _ => None,
        })
    }

    /// Iterates over tool-call results.
    pub fn results(&self) -> impl Iterator<Item = &FunctionResultContent> {
        self.items.iter().filter_map(|item| match item {
            ContentItem::FunctionResult(result) => Some(result),
            _ => None,
        })
    }

    /// Returns `true` if the message requests tool calls.
    #[inline]
    pub fn has_calls(&self) -> bool {
        self.calls().next().is_some()
    }
}
