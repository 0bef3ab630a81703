//! OpenAI-style chat completion wire format.

use super::ChatMessageAdapter;
use crate::behavior::{FunctionChoice, FunctionChoiceBehavior};
use crate::chat::{
    AuthorRole, ChatHistory, ChatMessage, ContentItem, FunctionCallContent,
    FunctionResultContent, HistoryPolicy, ImageContent, Usage,
};
use crate::error::ConversionError;
use crate::function::FunctionDefinition;
use crate::streaming::parse_arguments;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// A message in the OpenAI chat format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum OpenAiMessage {
    /// System instructions.
    System {
        /// Text content.
        content: String,
    },
    /// User input.
    User {
        /// Text or multimodal content.
        content: OpenAiContent,
    },
    /// Model output.
    Assistant {
        /// Text content, absent for pure tool-call messages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Requested tool calls.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<OpenAiToolCall>,
    },
    /// Result of a tool call.
    Tool {
        /// Identifier of the originating call.
        tool_call_id: String,
        /// Result text.
        content: String,
    },
}

/// User content: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    /// Plain text.
    Text(String),
    /// Multimodal parts.
    Parts(Vec<OpenAiContentPart>),
}

/// A part of multimodal user content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    /// Text part.
    Text {
        /// The text.
        text: String,
    },
    /// Image part.
    ImageUrl {
        /// The image location.
        image_url: OpenAiImageUrl,
    },
}

/// Image location, a URL or a `data:` URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiImageUrl {
    /// The URL.
    pub url: String,
}

/// A tool call in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    /// Call identifier.
    pub id: String,
    /// Always `function`.
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    /// The called function.
    pub function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_owned()
}

/// Function name and JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    /// Full function name.
    pub name: String,
    /// Arguments as a JSON string.
    #[serde(default)]
    pub arguments: String,
}

/// A chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChatResponse {
    /// Response id.
    #[serde(default)]
    pub id: Option<String>,
    /// Model that answered.
    #[serde(default)]
    pub model: Option<String>,
    /// Returned choices.
    pub choices: Vec<OpenAiChoice>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

/// A choice of a chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChoice {
    /// Position of the choice.
    #[serde(default)]
    pub index: usize,
    /// The assistant message.
    pub message: OpenAiMessage,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage of a response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OpenAiUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        }
    }
}

/// Adapter for OpenAI-compatible providers. Merges require a common history.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    /// Returns the `tools` array for the advertised functions.
    pub fn tools(&self, functions: &[FunctionDefinition]) -> Vec<Value> {
        functions
            .iter()
            .map(|function| {
                json!({
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "description": function.description,
                        "parameters": function.parameters,
                    }
                })
            })
            .collect()
    }

    /// Returns the `tool_choice` value for a behavior.
    pub fn tool_choice(
        &self,
        behavior: &FunctionChoiceBehavior,
        functions: &[FunctionDefinition],
    ) -> Value {
        match behavior.choice() {
            FunctionChoice::Auto => json!("auto"),
            FunctionChoice::None => json!("none"),
            FunctionChoice::Required => match functions {
                [function] => json!({
                    "type": "function",
                    "function": { "name": function.name },
                }),
                _ => json!("required"),
            },
        }
    }

    fn message_to_wire(
        &self,
        message: &ChatMessage,
        wire: &mut Vec<OpenAiMessage>,
    ) -> Result<(), ConversionError> {
        match message.role {
            AuthorRole::System => wire.push(OpenAiMessage::System {
                content: message.content().unwrap_or_default(),
            }),
            AuthorRole::User => wire.push(OpenAiMessage::User {
                content: user_content(message),
            }),
            AuthorRole::Assistant => {
                let tool_calls = message
                    .calls()
                    .map(|call| -> Result<OpenAiToolCall, ConversionError> {
                        let id = call
                            .id
                            .clone()
                            .filter(|id| !id.is_empty())
                            .ok_or_else(|| ConversionError::MissingCallId {
                                function: call.full_name(),
                            })?;
                        Ok(OpenAiToolCall {
                            id,
                            kind: function_type(),
                            function: OpenAiFunctionCall {
                                name: call.full_name(),
                                arguments: Value::Object(call.arguments.clone()).to_string(),
                            },
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                wire.push(OpenAiMessage::Assistant {
                    content: message.content(),
                    tool_calls,
                });
            }
            AuthorRole::Tool => {
                let mut results = message.results().peekable();
                if results.peek().is_none() {
                    return Err(ConversionError::EmptyMessage {
                        role: message.role.to_string(),
                    });
                }
                for result in results {
                    let tool_call_id = result
                        .call_id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| ConversionError::MissingResultCallId {
                            function: result.full_name(),
                        })?;
                    let content =
                        result
                            .result_text()
                            .ok_or_else(|| ConversionError::MissingResult {
                                call_id: tool_call_id.clone(),
                            })?;
                    wire.push(OpenAiMessage::Tool {
                        tool_call_id,
                        content,
                    });
                }
            }
        }
        Ok(())
    }
}

fn user_content(message: &ChatMessage) -> OpenAiContent {
    let has_images = message
        .items
        .iter()
        .any(|item| matches!(item, ContentItem::Image(_)));
    if !has_images {
        return OpenAiContent::Text(message.content().unwrap_or_default());
    }
    let parts = message
        .items
        .iter()
        .filter_map(|item| match item {
            ContentItem::Text { text } => Some(OpenAiContentPart::Text { text: text.clone() }),
            ContentItem::Image(image) => image_url(image).map(|url| OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl { url },
            }),
            _ => None,
        })
        .collect();
    OpenAiContent::Parts(parts)
}

fn image_url(image: &ImageContent) -> Option<String> {
    if let Some(uri) = &image.uri {
        return Some(uri.clone());
    }
    let data = image.data.as_ref()?;
    let mime_type = image.mime_type.as_deref().unwrap_or("image/png");
    Some(format!("data:{mime_type};base64,{}", STANDARD.encode(data)))
}

fn image_from_url(url: &str) -> ImageContent {
    let inline = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .and_then(|(mime_type, data)| {
            STANDARD
                .decode(data)
                .ok()
                .map(|data| ImageContent::from_data(data, mime_type))
        });
    inline.unwrap_or_else(|| ImageContent::from_uri(url))
}

impl ChatMessageAdapter for OpenAiAdapter {
    type Wire = Vec<OpenAiMessage>;
    type Response = OpenAiChatResponse;

    fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy::RequireCommon
    }

    fn to_wire(&self, history: &ChatHistory) -> Result<Self::Wire, ConversionError> {
        let mut wire = Vec::with_capacity(history.len());
        for message in history {
            self.message_to_wire(message, &mut wire)?;
        }
        Ok(wire)
    }

    fn from_wire(&self, wire: &Self::Wire) -> Result<Vec<ChatMessage>, ConversionError> {
        // Tool messages only carry the call id, so names are recovered from earlier calls.
        let mut call_names = HashMap::new();
        let mut messages = Vec::with_capacity(wire.len());
        for message in wire {
            let message = match message {
                OpenAiMessage::System { content } => ChatMessage::system(content.clone()),
                OpenAiMessage::User { content } => match content {
                    OpenAiContent::Text(text) => ChatMessage::user(text.clone()),
                    OpenAiContent::Parts(parts) => {
                        let items = parts
                            .iter()
                            .map(|part| match part {
                                OpenAiContentPart::Text { text } => ContentItem::text(text.clone()),
                                OpenAiContentPart::ImageUrl { image_url } => {
                                    ContentItem::Image(image_from_url(&image_url.url))
                                }
                            })
                            .collect();
                        ChatMessage::new(AuthorRole::User, items)
                    }
                },
                OpenAiMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut items = Vec::new();
                    if let Some(text) = content.as_ref().filter(|text| !text.is_empty()) {
                        items.push(ContentItem::text(text.clone()));
                    }
                    for call in tool_calls {
                        if call.id.is_empty() {
                            return Err(ConversionError::MissingCallId {
                                function: call.function.name.clone(),
                            });
                        }
                        let arguments =
                            parse_arguments(&call.function.name, &call.function.arguments)?;
                        call_names.insert(call.id.clone(), call.function.name.clone());
                        items.push(ContentItem::FunctionCall(FunctionCallContent::new(
                            call.id.clone(),
                            &call.function.name,
                            arguments,
                        )));
                    }
                    if items.is_empty() {
                        items.push(ContentItem::text(""));
                    }
                    ChatMessage::new(AuthorRole::Assistant, items)
                }
                OpenAiMessage::Tool {
                    tool_call_id,
                    content,
                } => {
                    if tool_call_id.is_empty() {
                        return Err(ConversionError::MissingResultCallId {
                            function: String::new(),
                        });
                    }
                    if content.is_empty() {
                        return Err(ConversionError::MissingResult {
                            call_id: tool_call_id.clone(),
                        });
                    }
                    let full_name = call_names.get(tool_call_id).cloned().unwrap_or_default();
                    let call = FunctionCallContent::new(
                        tool_call_id.clone(),
                        &full_name,
                        Default::default(),
                    );
                    ChatMessage::tool_result(FunctionResultContent::for_call(
                        &call,
                        content.clone(),
                    ))
                }
            };
            messages.push(message);
        }
        Ok(messages)
    }

    fn from_response(
        &self,
        response: &Self::Response,
    ) -> Result<Vec<ChatMessage>, ConversionError> {
        let mut choices = response.choices.iter().collect::<Vec<_>>();
        choices.sort_by_key(|choice| choice.index);

        let wire = choices
            .iter()
            .map(|choice| choice.message.clone())
            .collect::<Vec<_>>();
        let mut messages = self.from_wire(&wire)?;
        for (message, choice) in messages.iter_mut().zip(choices) {
            if message.role != AuthorRole::Assistant {
                return Err(ConversionError::UnknownRole(message.role.to_string()));
            }
            message.model_id = response.model.clone();
            if let Some(reason) = &choice.finish_reason {
                message
                    .metadata
                    .insert("finish_reason".to_owned(), reason.clone().into());
            }
            if let Some(id) = &response.id {
                message.metadata.insert("id".to_owned(), id.clone().into());
            }
        }
        if let (Some(first), Some(usage)) = (messages.first_mut(), response.usage) {
            first.usage = Some(usage.into());
        }
        Ok(messages)
    }
}
