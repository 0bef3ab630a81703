//! Streaming chat content and its aggregation into one message.
//!
//! A streaming response is a finite producer of [`StreamingContent`] chunks. The
//! tool-call loop never looks at chunks one by one: the stream is drained with
//! [`drain`] first, and only the aggregated [`ChatMessage`] is checked for tool calls.

use crate::chat::{AuthorRole, ChatMessage, ContentItem, FunctionCallContent, Usage};
use crate::error::{ConversionError, KernelResult};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::pin::Pin;

/// A chunk of a streaming chat response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingContent {
    /// A text delta.
    Text(String),
    /// A fragment of a tool call. Fragments with the same index belong together.
    FunctionCall {
        /// Position of the call in the response.
        index: usize,
        /// Call id, usually present on the first fragment only.
        id: Option<String>,
        /// Full function name, usually present on the first fragment only.
        name: Option<String>,
        /// Fragment of the JSON arguments.
        arguments: String,
    },
    /// Token usage, usually sent with the last chunk.
    Usage(Usage),
    /// Model that produces the stream.
    ModelId(String),
}

impl StreamingContent {
    /// Splits a complete message into chunks, text first.
    pub fn from_message(message: &ChatMessage) -> Vec<StreamingContent> {
        let mut chunks = Vec::new();
        if let Some(model_id) = &message.model_id {
            chunks.push(StreamingContent::ModelId(model_id.clone()));
        }
        if let Some(text) = message.content() {
            chunks.push(StreamingContent::Text(text));
        }
        for (index, call) in message.calls().enumerate() {
            chunks.push(StreamingContent::FunctionCall {
                index,
                id: call.id.clone(),
                name: Some(call.full_name()),
                arguments: Value::Object(call.arguments.clone()).to_string(),
            });
        }
        if let Some(usage) = message.usage {
            chunks.push(StreamingContent::Usage(usage));
        }
        chunks
    }
}

/// A boxed stream of chunks.
pub type StreamingResult = Pin<Box<dyn Stream<Item = KernelResult<StreamingContent>> + Send>>;

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Collects streaming chunks into one assistant message.
#[derive(Debug, Default)]
pub struct StreamingCollector {
    text: String,
    calls: BTreeMap<usize, PendingCall>,
    usage: Option<Usage>,
    model_id: Option<String>,
}

impl StreamingCollector {
    /// Creates an empty collector.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk.
    pub fn push(&mut self, chunk: StreamingContent) {
        match chunk {
            StreamingContent::Text(text) => self.text.push_str(&text),
            StreamingContent::FunctionCall {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.calls.entry(index).or_default();
                if id.as_deref().is_some_and(|id| !id.is_empty()) {
                    call.id = id;
                }
                if name.as_deref().is_some_and(|name| !name.is_empty()) {
                    call.name = name;
                }
                call.arguments.push_str(&arguments);
            }
            StreamingContent::Usage(usage) => match &mut self.usage {
                Some(total) => *total += usage,
                None => self.usage = Some(usage),
            },
            StreamingContent::ModelId(model_id) => self.model_id = Some(model_id),
        }
    }

    /// Builds the aggregated message. Tool calls keep the order of their indices.
    pub fn finish(self) -> Result<ChatMessage, ConversionError> {
        let mut items = Vec::new();
        if !self.text.is_empty() {
            items.push(ContentItem::text(self.text));
        }
        for (index, call) in self.calls {
            let name = call
                .name
                .ok_or(ConversionError::MissingFunctionName { index })?;
            let arguments = parse_arguments(&name, &call.arguments)?;
            let mut content = FunctionCallContent::new("", &name, arguments);
            content.id = call.id;
            items.push(ContentItem::FunctionCall(content));
        }
        if items.is_empty() {
            items.push(ContentItem::text(""));
        }

        let mut message = ChatMessage::new(AuthorRole::Assistant, items);
        message.model_id = self.model_id;
        message.usage = self.usage;
        Ok(message)
    }
}

/// Parses the JSON arguments of a tool call. An empty string means no arguments.
pub(crate) fn parse_arguments(
    function: &str,
    arguments: &str,
) -> Result<Map<String, Value>, ConversionError> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ConversionError::InvalidArguments {
            function: function.to_owned(),
            message: format!("expected an object, got `{other}`"),
        }),
        Err(err) => Err(ConversionError::InvalidArguments {
            function: function.to_owned(),
            message: err.to_string(),
        }),
    }
}

/// Drains a stream into one message.
pub async fn drain<S>(stream: S) -> KernelResult<ChatMessage>
where
    S: Stream<Item = KernelResult<StreamingContent>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut collector = StreamingCollector::new();
    let mut chunks = 0usize;
    while let Some(chunk) = stream.next().await {
        collector.push(chunk?);
        chunks += 1;
    }
    tracing::debug!("drained {} streaming chunks", chunks);
    Ok(collector.finish()?)
}
