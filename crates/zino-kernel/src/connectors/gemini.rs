//! Gemini-style `generateContent` wire format.

use super::ChatMessageAdapter;
use crate::behavior::{FunctionChoice, FunctionChoiceBehavior};
use crate::chat::{
    AuthorRole, ChatHistory, ChatMessage, ContentItem, FunctionCallContent,
    FunctionResultContent, HistoryPolicy, ImageContent, Usage,
};
use crate::error::ConversionError;
use crate::function::FunctionDefinition;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};

/// Key used to wrap non-object results, since `functionResponse.response` must be an object.
const RESULT_KEY: &str = "result";

/// A whole conversation in the Gemini format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPayload {
    /// System instructions, kept out of the turn list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    /// Conversation turns.
    #[serde(default)]
    pub contents: Vec<GeminiContent>,
}

/// Role of a Gemini turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeminiRole {
    /// User input and function responses.
    User,
    /// Model output.
    Model,
    /// Legacy role for function responses.
    Function,
}

/// One turn of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiContent {
    /// Author of the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<GeminiRole>,
    /// Ordered parts.
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A part of a turn. Exactly one field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    /// Text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GeminiBlob>,
    /// Remote file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<GeminiFileData>,
    /// Function call issued by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GeminiFunctionCall>,
    /// Function response sent back to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Base64-encoded inline data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBlob {
    /// MIME type.
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// A file referenced by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFileData {
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// File URI.
    pub file_uri: String,
}

/// A function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    /// Call id. Older models omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Full function name.
    pub name: String,
    /// Arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// A function response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    /// Id of the originating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Full function name.
    pub name: String,
    /// Result object.
    #[serde(default)]
    pub response: Value,
}

/// A `generateContent` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    /// Candidate answers.
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    /// Token usage.
    #[serde(default)]
    pub usage_metadata: Option<GeminiUsage>,
    /// Model that answered.
    #[serde(default)]
    pub model_version: Option<String>,
}

/// A candidate answer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    /// Candidate content.
    #[serde(default)]
    pub content: GeminiContent,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage of a response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_token_count: u64,
    /// Tokens in all candidates.
    #[serde(default)]
    pub candidates_token_count: u64,
}

impl From<GeminiUsage> for Usage {
    fn from(usage: GeminiUsage) -> Self {
        Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
        }
    }
}

/// Adapter for Gemini providers. Histories are merged without a commonality check.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    /// Returns the `tools` array for the advertised functions.
    pub fn tools(&self, functions: &[FunctionDefinition]) -> Vec<Value> {
        if functions.is_empty() {
            return Vec::new();
        }
        let declarations = functions
            .iter()
            .map(|function| {
                json!({
                    "name": function.name,
                    "description": function.description,
                    "parameters": function.parameters,
                })
            })
            .collect::<Vec<_>>();
        vec![json!({ "functionDeclarations": declarations })]
    }

    /// Returns the `toolConfig` value for a behavior.
    pub fn tool_config(
        &self,
        behavior: &FunctionChoiceBehavior,
        functions: &[FunctionDefinition],
    ) -> Value {
        let mode = match behavior.choice() {
            FunctionChoice::Auto => "AUTO",
            FunctionChoice::Required => "ANY",
            FunctionChoice::None => "NONE",
        };
        let mut config = json!({ "mode": mode });
        if behavior.choice() == FunctionChoice::Required && !functions.is_empty() {
            let names = functions.iter().map(|f| f.name.clone()).collect::<Vec<_>>();
            config["allowedFunctionNames"] = json!(names);
        }
        json!({ "functionCallingConfig": config })
    }
}

fn image_part(image: &ImageContent) -> Option<GeminiPart> {
    if let Some(data) = &image.data {
        let mime_type = image
            .mime_type
            .clone()
            .unwrap_or_else(|| "image/png".to_owned());
        return Some(GeminiPart {
            inline_data: Some(GeminiBlob {
                mime_type,
                data: STANDARD.encode(data),
            }),
            ..GeminiPart::default()
        });
    }
    image.uri.as_ref().map(|uri| GeminiPart {
        file_data: Some(GeminiFileData {
            mime_type: image.mime_type.clone(),
            file_uri: uri.clone(),
        }),
        ..GeminiPart::default()
    })
}

fn response_object(result: &Value) -> Value {
    match result {
        Value::Object(map) if !is_wrapped(map) => result.clone(),
        other => json!({ RESULT_KEY: other }),
    }
}

fn is_wrapped(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.contains_key(RESULT_KEY)
}

fn response_value(response: &Value) -> Value {
    match response {
        Value::Object(map) if is_wrapped(map) => map[RESULT_KEY].clone(),
        other => other.clone(),
    }
}

fn result_part(result: &FunctionResultContent) -> Result<GeminiPart, ConversionError> {
    let call_id = result
        .call_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConversionError::MissingResultCallId {
            function: result.full_name(),
        })?;
    let value = result
        .result
        .as_ref()
        .filter(|_| result.result_text().is_some())
        .ok_or_else(|| ConversionError::MissingResult {
            call_id: call_id.clone(),
        })?;
    Ok(GeminiPart {
        function_response: Some(GeminiFunctionResponse {
            id: Some(call_id),
            name: result.full_name(),
            response: response_object(value),
        }),
        ..GeminiPart::default()
    })
}

/// Decoding state shared across the turns of one conversation.
#[derive(Default)]
struct Decoder {
    // Ids of decoded calls per function name, oldest first.
    pending: HashMap<String, VecDeque<String>>,
}

impl Decoder {
    fn call(&mut self, call: &GeminiFunctionCall) -> FunctionCallContent {
        let id = call
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
        self.pending
            .entry(call.name.clone())
            .or_default()
            .push_back(id.clone());
        FunctionCallContent::new(id, &call.name, call.args.clone())
    }

    fn result(
        &mut self,
        response: &GeminiFunctionResponse,
    ) -> Result<FunctionResultContent, ConversionError> {
        let pending = self.pending.entry(response.name.clone()).or_default();
        let call_id = match response.id.as_ref().filter(|id| !id.is_empty()) {
            Some(id) => {
                pending.retain(|pending_id| pending_id != id);
                id.clone()
            }
            None => pending
                .pop_front()
                .ok_or_else(|| ConversionError::MissingResultCallId {
                    function: response.name.clone(),
                })?,
        };
        let call = FunctionCallContent::new(call_id, &response.name, Map::new());
        Ok(FunctionResultContent::for_call(
            &call,
            response_value(&response.response),
        ))
    }

    fn content(&mut self, content: &GeminiContent) -> Result<Vec<ChatMessage>, ConversionError> {
        let mut messages = Vec::new();
        match content.role {
            Some(GeminiRole::Model) => {
                let mut items = Vec::new();
                for part in &content.parts {
                    if let Some(text) = &part.text {
                        items.push(ContentItem::text(text.clone()));
                    }
                    if let Some(call) = &part.function_call {
                        items.push(ContentItem::FunctionCall(self.call(call)));
                    }
                }
                if items.is_empty() {
                    items.push(ContentItem::text(""));
                }
                messages.push(ChatMessage::new(AuthorRole::Assistant, items));
            }
            Some(GeminiRole::User) | Some(GeminiRole::Function) | None => {
                let mut items = Vec::new();
                for part in &content.parts {
                    if let Some(response) = &part.function_response {
                        messages.push(ChatMessage::tool_result(self.result(response)?));
                        continue;
                    }
                    if let Some(text) = &part.text {
                        items.push(ContentItem::text(text.clone()));
                    }
                    if let Some(blob) = &part.inline_data {
                        let data = STANDARD
                            .decode(&blob.data)
                            .map_err(|err| ConversionError::InvalidInlineData(err.to_string()))?;
                        items.push(ContentItem::Image(ImageContent::from_data(
                            data,
                            blob.mime_type.clone(),
                        )));
                    }
                    if let Some(file) = &part.file_data {
                        items.push(ContentItem::Image(ImageContent {
                            mime_type: file.mime_type.clone(),
                            ..ImageContent::from_uri(file.file_uri.clone())
                        }));
                    }
                }
                if !items.is_empty() {
                    messages.push(ChatMessage::new(AuthorRole::User, items));
                }
            }
        }
        Ok(messages)
    }
}

impl ChatMessageAdapter for GeminiAdapter {
    type Wire = GeminiPayload;
    type Response = GeminiResponse;

    fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy::AcceptAll
    }

    fn to_wire(&self, history: &ChatHistory) -> Result<Self::Wire, ConversionError> {
        let mut payload = GeminiPayload::default();
        for message in history {
            match message.role {
                AuthorRole::System => {
                    let instruction = payload
                        .system_instruction
                        .get_or_insert_with(GeminiContent::default);
                    instruction
                        .parts
                        .push(GeminiPart::text(message.content().unwrap_or_default()));
                }
                AuthorRole::User => {
                    let parts = message
                        .items
                        .iter()
                        .filter_map(|item| match item {
                            ContentItem::Text { text } => Some(GeminiPart::text(text.clone())),
                            ContentItem::Image(image) => image_part(image),
                            _ => None,
                        })
                        .collect();
                    payload.contents.push(GeminiContent {
                        role: Some(GeminiRole::User),
                        parts,
                    });
                }
                AuthorRole::Assistant => {
                    let mut parts = Vec::new();
                    for item in &message.items {
                        match item {
                            ContentItem::Text { text } if !text.is_empty() => {
                                parts.push(GeminiPart::text(text.clone()));
                            }
                            ContentItem::FunctionCall(call) => parts.push(GeminiPart {
                                function_call: Some(GeminiFunctionCall {
                                    id: call.id.clone(),
                                    name: call.full_name(),
                                    args: call.arguments.clone(),
                                }),
                                ..GeminiPart::default()
                            }),
                            _ => {}
                        }
                    }
                    if parts.is_empty() {
                        parts.push(GeminiPart::text(""));
                    }
                    payload.contents.push(GeminiContent {
                        role: Some(GeminiRole::Model),
                        parts,
                    });
                }
                AuthorRole::Tool => {
                    let parts = message
                        .results()
                        .map(result_part)
                        .collect::<Result<Vec<_>, _>>()?;
                    if parts.is_empty() {
                        return Err(ConversionError::EmptyMessage {
                            role: message.role.to_string(),
                        });
                    }
                    // Consecutive tool messages share one user turn.
                    match payload.contents.last_mut() {
                        Some(last)
                            if last.role == Some(GeminiRole::User)
                                && last.parts.iter().all(|p| p.function_response.is_some()) =>
                        {
                            last.parts.extend(parts);
                        }
                        _ => payload.contents.push(GeminiContent {
                            role: Some(GeminiRole::User),
                            parts,
                        }),
                    }
                }
            }
        }
        Ok(payload)
    }

    fn from_wire(&self, wire: &Self::Wire) -> Result<Vec<ChatMessage>, ConversionError> {
        let mut messages = Vec::new();
        if let Some(instruction) = &wire.system_instruction {
            let items = instruction
                .parts
                .iter()
                .filter_map(|part| part.text.clone().map(ContentItem::text))
                .collect::<Vec<_>>();
            if !items.is_empty() {
                messages.push(ChatMessage::new(AuthorRole::System, items));
            }
        }
        let mut decoder = Decoder::default();
        for content in &wire.contents {
            messages.extend(decoder.content(content)?);
        }
        Ok(messages)
    }

    fn from_response(
        &self,
        response: &Self::Response,
    ) -> Result<Vec<ChatMessage>, ConversionError> {
        let mut decoder = Decoder::default();
        let mut messages = Vec::with_capacity(response.candidates.len());
        for candidate in &response.candidates {
            let content = GeminiContent {
                role: Some(GeminiRole::Model),
                parts: candidate.content.parts.clone(),
            };
            for mut message in decoder.content(&content)? {
                message.model_id = response.model_version.clone();
                if let Some(reason) = &candidate.finish_reason {
                    message
                        .metadata
                        .insert("finish_reason".to_owned(), reason.clone().into());
                }
                messages.push(message);
            }
        }
        if messages.is_empty() {
            tracing::warn!("Gemini response has no candidates");
        }
        if let (Some(first), Some(usage)) = (messages.first_mut(), response.usage_metadata) {
            first.usage = Some(usage.into());
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_call(id: &str) -> FunctionCallContent {
        let mut arguments = Map::new();
        arguments.insert("a".to_owned(), 2.into());
        arguments.insert("b".to_owned(), 2.into());
        FunctionCallContent::new(id, "math-add", arguments)
    }

    #[test]
    fn test_to_wire_shapes() {
        let call = add_call("call_1");
        let mut history = ChatHistory::with_system_message("be brief");
        history.add_user_message("2+2?");
        history.add_message(ChatMessage::function_calls(vec![call.clone()]));
        history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
            &call, 4,
        )));
        let payload = GeminiAdapter.to_wire(&history).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["name"], "math-add");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["args"]["a"], 2);
        assert_eq!(json["contents"][2]["role"], "user");
        assert_eq!(
            json["contents"][2]["parts"][0]["functionResponse"],
            json!({ "id": "call_1", "name": "math-add", "response": { "result": 4 } })
        );
    }

    #[test]
    fn test_parallel_results_share_one_turn() {
        let first = add_call("call_1");
        let second = add_call("call_2");
        let mut history = ChatHistory::new();
        history.add_message(ChatMessage::function_calls(vec![
            first.clone(),
            second.clone(),
        ]));
        history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
            &first, 4,
        )));
        history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
            &second, 4,
        )));
        let payload = GeminiAdapter.to_wire(&history).unwrap();
        assert_eq!(payload.contents.len(), 2);
        assert_eq!(payload.contents[1].parts.len(), 2);

        let messages = GeminiAdapter.from_wire(&payload).unwrap();
        assert_eq!(messages, history.messages().to_vec());
    }

    #[test]
    fn test_object_results_round_trip() {
        let first = add_call("call_1");
        let second = add_call("call_2");
        let mut history = ChatHistory::new();
        history.add_message(ChatMessage::function_calls(vec![
            first.clone(),
            second.clone(),
        ]));
        history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
            &first,
            json!({ "result": 4 }),
        )));
        history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
            &second,
            json!({ "sum": 4 }),
        )));
        let payload = GeminiAdapter.to_wire(&history).unwrap();
        let parts = &payload.contents[1].parts;
        let responses = parts
            .iter()
            .filter_map(|part| part.function_response.as_ref())
            .map(|response| response.response.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            responses,
            [json!({ "result": { "result": 4 } }), json!({ "sum": 4 })]
        );

        let messages = GeminiAdapter.from_wire(&payload).unwrap();
        assert_eq!(messages, history.messages().to_vec());
    }

    #[test]
    fn test_missing_result_is_fatal() {
        let call = add_call("call_1");
        let mut result = FunctionResultContent::for_call(&call, "");
        let mut history = ChatHistory::new();
        history.add_message(ChatMessage::tool_result(result.clone()));
        assert!(matches!(
            GeminiAdapter.to_wire(&history),
            Err(ConversionError::MissingResult { .. })
        ));

        result.call_id = None;
        result.result = Some("4".into());
        history.clear();
        history.add_message(ChatMessage::tool_result(result));
        assert!(matches!(
            GeminiAdapter.to_wire(&history),
            Err(ConversionError::MissingResultCallId { .. })
        ));
    }

    #[test]
    fn test_generated_call_ids_correlate() {
        let payload: GeminiPayload = serde_json::from_value(json!({
            "contents": [
                { "role": "user", "parts": [{ "text": "2+2?" }] },
                { "role": "model", "parts": [{ "functionCall": { "name": "math-add", "args": { "a": 2, "b": 2 } } }] },
                { "role": "user", "parts": [{ "functionResponse": { "name": "math-add", "response": { "result": 4 } } }] }
            ]
        }))
        .unwrap();
        let messages = GeminiAdapter.from_wire(&payload).unwrap();
        assert_eq!(messages.len(), 3);
        let call = messages[1].calls().next().unwrap();
        let call_id = call.id.clone().unwrap();
        assert!(call_id.starts_with("call_"));
        let result = messages[2].results().next().unwrap();
        assert_eq!(result.call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(result.result, Some(Value::from(4)));
    }

    #[test]
    fn test_orphan_response_is_fatal() {
        let payload: GeminiPayload = serde_json::from_value(json!({
            "contents": [
                { "role": "user", "parts": [{ "functionResponse": { "name": "math-add", "response": { "result": 4 } } }] }
            ]
        }))
        .unwrap();
        assert!(matches!(
            GeminiAdapter.from_wire(&payload),
            Err(ConversionError::MissingResultCallId { .. })
        ));
    }

    #[test]
    fn test_inline_image_round_trip() {
        let message = ChatMessage::new(
            AuthorRole::User,
            vec![
                ContentItem::text("what is this?"),
                ContentItem::Image(ImageContent::from_data(vec![1, 2, 3], "image/png")),
            ],
        );
        let history = ChatHistory::from(vec![message.clone()]);
        let payload = GeminiAdapter.to_wire(&history).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "AQID");
        assert_eq!(GeminiAdapter.from_wire(&payload).unwrap(), vec![message]);
    }

    #[test]
    fn test_from_response() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "4" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 1, "totalTokenCount": 10 },
            "modelVersion": "gemini-test"
        }))
        .unwrap();
        let messages = GeminiAdapter.from_response(&response).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content().as_deref(), Some("4"));
        assert_eq!(messages[0].model_id.as_deref(), Some("gemini-test"));
        assert_eq!(messages[0].usage.map(|u| u.total_tokens()), Some(10));
        assert_eq!(messages[0].metadata["finish_reason"], "STOP");
    }

    #[test]
    fn test_tool_config() {
        let functions = vec![FunctionDefinition {
            name: "math-add".to_owned(),
            description: "Adds".to_owned(),
            parameters: json!({ "type": "object" }),
        }];
        let required = FunctionChoiceBehavior::required(true, None);
        let config = GeminiAdapter.tool_config(&required, &functions);
        assert_eq!(config["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(
            config["functionCallingConfig"]["allowedFunctionNames"],
            json!(["math-add"])
        );
        let tools = GeminiAdapter.tools(&functions);
        assert_eq!(tools[0]["functionDeclarations"][0]["name"], "math-add");
    }
}
