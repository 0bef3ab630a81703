use serde_json::{Map, Value, json};
use zino_kernel::chat::{FunctionCallContent, FunctionResultContent, HistoryPolicy};
use zino_kernel::connectors::gemini::GeminiResponse;
use zino_kernel::connectors::openai::OpenAiChatResponse;
use zino_kernel::connectors::{ChatMessageAdapter, GeminiAdapter, OpenAiAdapter};
use zino_kernel::{ChatHistory, ChatMessage, ConversionError, KernelError};

fn conversation() -> ChatHistory {
    let mut arguments = Map::new();
    arguments.insert("a".to_owned(), 2.into());
    arguments.insert("b".to_owned(), 2.into());
    let call = FunctionCallContent::new("call_1", "math-add", arguments);

    let mut history = ChatHistory::with_system_message("Answer with numbers only.");
    history.add_user_message("2+2?");
    history.add_message(ChatMessage::function_calls(vec![call.clone()]));
    history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
        &call, "4",
    )));
    history.add_assistant_message("4");
    history
}

fn assert_preserved(original: &ChatHistory, restored: &[ChatMessage]) {
    assert_eq!(original.len(), restored.len());
    for (original, restored) in original.iter().zip(restored) {
        assert_eq!(original.role, restored.role);
        assert_eq!(original.content(), restored.content());
        let call_ids = |m: &ChatMessage| m.calls().map(|c| c.id.clone()).collect::<Vec<_>>();
        let result_ids = |m: &ChatMessage| {
            m.results()
                .map(|r| r.call_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(call_ids(original), call_ids(restored));
        assert_eq!(result_ids(original), result_ids(restored));
    }
}

fn round_trip<A: ChatMessageAdapter>(adapter: &A, history: &ChatHistory) -> Vec<ChatMessage> {
    let wire = adapter.to_wire(history).unwrap();
    adapter.from_wire(&wire).unwrap()
}

#[test]
fn openai_round_trip_preserves_correlation() {
    let history = conversation();
    assert_preserved(&history, &round_trip(&OpenAiAdapter, &history));
}

#[test]
fn gemini_round_trip_preserves_correlation() {
    let history = conversation();
    assert_preserved(&history, &round_trip(&GeminiAdapter, &history));
}

#[test]
fn merge_policies_per_adapter() {
    let base = conversation();
    let mut extended = base.clone();
    extended.add_user_message("and 3+3?");
    let mut diverged = ChatHistory::with_system_message("Answer in words.");
    diverged.add_user_message("2+2?");

    // OpenAI requires the incoming history to extend the receiver.
    let policy = OpenAiAdapter.history_policy();
    assert_eq!(policy, HistoryPolicy::RequireCommon);
    let mut history = base.clone();
    history.add_all(&extended, policy).unwrap();
    assert_eq!(history, extended);
    let mut history = base.clone();
    let err = history.add_all(&diverged, policy).unwrap_err();
    assert!(matches!(err, KernelError::HistoryMismatch { index: 0 }));
    assert_eq!(history, base);

    // Gemini accepts any incoming history.
    let policy = GeminiAdapter.history_policy();
    assert_eq!(policy, HistoryPolicy::AcceptAll);
    let mut history = base.clone();
    history.add_all(&diverged, policy).unwrap();
    assert!(history.len() > base.len());
}

#[test]
fn missing_call_id_is_fatal_for_both_adapters() {
    let mut call = FunctionCallContent::new("call_1", "math-add", Map::new());
    call.id = None;
    let mut history = ChatHistory::new();
    history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
        &call, "4",
    )));
    assert!(matches!(
        OpenAiAdapter.to_wire(&history),
        Err(ConversionError::MissingResultCallId { .. })
    ));
    assert!(matches!(
        GeminiAdapter.to_wire(&history),
        Err(ConversionError::MissingResultCallId { .. })
    ));
}

#[test]
fn empty_result_is_fatal_for_both_adapters() {
    let call = FunctionCallContent::new("call_1", "math-add", Map::new());
    let mut history = ChatHistory::new();
    history.add_message(ChatMessage::tool_result(FunctionResultContent::for_call(
        &call,
        Value::Null,
    )));
    assert!(matches!(
        OpenAiAdapter.to_wire(&history),
        Err(ConversionError::MissingResult { .. })
    ));
    assert!(matches!(
        GeminiAdapter.to_wire(&history),
        Err(ConversionError::MissingResult { .. })
    ));
}

#[test]
fn responses_decode_to_the_same_shape() {
    let openai: OpenAiChatResponse = serde_json::from_value(json!({
        "model": "gpt-test",
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": {
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "math-add", "arguments": "{\"a\":2,\"b\":2}" }
                }]
            }
        }]
    }))
    .unwrap();
    let gemini: GeminiResponse = serde_json::from_value(json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{ "functionCall": { "id": "call_1", "name": "math-add", "args": { "a": 2, "b": 2 } } }]
            },
            "finishReason": "STOP"
        }],
        "modelVersion": "gemini-test"
    }))
    .unwrap();

    let openai = OpenAiAdapter.from_response(&openai).unwrap();
    let gemini = GeminiAdapter.from_response(&gemini).unwrap();
    let openai_calls = openai[0].calls().cloned().collect::<Vec<_>>();
    let gemini_calls = gemini[0].calls().cloned().collect::<Vec<_>>();
    assert_eq!(openai_calls, gemini_calls);
    assert_eq!(openai_calls[0].full_name(), "math-add");
}
