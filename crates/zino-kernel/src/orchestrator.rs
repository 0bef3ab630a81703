//! The multi-round tool-call loop.
//!
//! Each round sends the history and the advertised functions to the selected chat
//! service. When the answer carries tool calls and auto-invoke is on, every call is
//! resolved first, then executed in the order the provider listed them, and the
//! assistant message plus one tool message per call are appended to the history
//! together. A round either applies completely or not at all.

use crate::behavior::{FunctionChoice, FunctionChoiceBehavior};
use crate::chat::{ChatHistory, ChatMessage, FunctionCallContent, FunctionResultContent, Usage};
use crate::config::OrchestratorConfig;
use crate::error::{KernelError, KernelResult};
use crate::function::{KernelArguments, KernelFunction, value_to_text};
use crate::hooks::{
    Hook, HookEvent, HookKind, KernelHooks, PostChatCompletionEvent, PreChatCompletionEvent,
};
use crate::invocation::{InvocationOutcome, invoke_function};
use crate::kernel::Kernel;
use crate::observe::IdleSpan;
use crate::services::{ChatCompletionService, ChatRequest};
use crate::streaming::drain;
use futures::future;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Instrument;

/// Tool result sent for a call whose function returned nothing.
const EMPTY_RESULT: &str = "The function completed without a result.";

/// The outcome of one orchestrated conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorResponse {
    /// Assistant messages of the last round, or its tool messages when a hook
    /// terminated the loop.
    pub messages: Vec<ChatMessage>,
    /// Number of model rounds used.
    pub rounds: usize,
    /// Token usage summed over all rounds.
    pub usage: Usage,
    /// Whether a `function-invoked` hook stopped the loop.
    pub terminated: bool,
}

impl OrchestratorResponse {
    /// Returns the text of the last message that has any.
    pub fn text(&self) -> Option<String> {
        self.messages.iter().rev().find_map(|message| message.content())
    }
}

/// Drives the tool-call loop between a chat service and kernel functions.
pub struct ToolCallOrchestrator<'a> {
    kernel: &'a Kernel,
    behavior: FunctionChoiceBehavior,
    config: OrchestratorConfig,
    hooks: KernelHooks,
}

impl<'a> ToolCallOrchestrator<'a> {
    /// Starts building an orchestrator.
    #[inline]
    pub fn builder() -> ToolCallOrchestratorBuilder<'a> {
        ToolCallOrchestratorBuilder::default()
    }

    /// Returns the function choice behavior.
    #[inline]
    pub fn behavior(&self) -> &FunctionChoiceBehavior {
        &self.behavior
    }

    /// Returns the loop settings.
    #[inline]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs the loop on `history` until the model answers without tool calls.
    ///
    /// `arguments` select the service and are passed to every invoked function,
    /// overlaid by the arguments of the call. On error the history keeps the
    /// rounds completed before the failing one.
    pub async fn invoke(
        &self,
        history: &mut ChatHistory,
        arguments: Option<&KernelArguments>,
    ) -> KernelResult<OrchestratorResponse> {
        let hooks = KernelHooks::merge(self.kernel.hooks(), &self.hooks);
        let selection = self.kernel.select_chat_service(None, arguments)?;
        let service = selection.service;
        let span = IdleSpan::new(
            tracing::info_span!(
                "chat_completion",
                model_id = service.model_id(),
                choice = self.behavior.choice().as_str(),
            ),
            self.config.span_idle_timeout(),
        );

        let max_rounds = self.config.max_rounds;
        let mut exhausted = HashSet::new();
        let mut usage = Usage::default();
        for round in 1..=max_rounds {
            tracing::info!("Current round: {}/{}", round, max_rounds);

            let mut functions = self
                .behavior
                .advertised_functions(self.kernel.registry(), &exhausted);
            let mut settings = selection.settings.clone();
            let mut rewritten = None;
            if hooks.handles(HookKind::PreChatCompletion) {
                let event = HookEvent::PreChatCompletion(PreChatCompletionEvent {
                    history: history.clone(),
                    functions,
                    settings,
                });
                match hooks.execute(event)? {
                    HookEvent::PreChatCompletion(event) => {
                        functions = event.functions;
                        settings = event.settings;
                        rewritten = Some(event.history);
                    }
                    _ => unreachable!("hooks preserve the event kind"),
                }
            }
            // A choice over zero functions cannot be honored by the provider.
            let behavior = if functions.is_empty() && !exhausted.is_empty() {
                None
            } else {
                Some(self.behavior.clone())
            };
            let request = ChatRequest {
                functions,
                behavior,
                settings,
            };

            span.touch();
            let messages = self
                .complete(service.as_ref(), rewritten.as_ref().unwrap_or(history), &request)
                .instrument(span.span())
                .await?;
            span.touch();

            let messages = if hooks.handles(HookKind::PostChatCompletion) {
                let event = HookEvent::PostChatCompletion(PostChatCompletionEvent { messages });
                match hooks.execute(event)? {
                    HookEvent::PostChatCompletion(event) => event.messages,
                    _ => unreachable!("hooks preserve the event kind"),
                }
            } else {
                messages
            };
            for message in &messages {
                if let Some(message_usage) = message.usage {
                    usage += message_usage;
                }
            }

            let calls = messages
                .iter()
                .flat_map(|message| message.calls().cloned())
                .collect::<Vec<_>>();
            if calls.is_empty() || !self.behavior.auto_invoke() {
                if !calls.is_empty() {
                    tracing::info!("returning {} tool calls to the caller", calls.len());
                }
                history.extend(messages.clone());
                span.finish();
                return Ok(OrchestratorResponse {
                    messages,
                    rounds: round,
                    usage,
                    terminated: false,
                });
            }

            let functions = calls
                .iter()
                .map(|call| {
                    self.kernel
                        .registry()
                        .resolve(&call.full_name(), call.id.as_deref())
                })
                .collect::<KernelResult<Vec<_>>>()?;
            let outcomes = self
                .execute_calls(&calls, &functions, arguments, &hooks)
                .instrument(span.span())
                .await;
            span.touch();

            let mut results = Vec::with_capacity(calls.len());
            let mut terminate = false;
            for (call, outcome) in calls.iter().zip(outcomes) {
                let value = match outcome {
                    Ok(outcome) => {
                        terminate |= outcome.terminate;
                        let value = outcome.result.value;
                        if value_to_text(&value).is_empty() {
                            Value::String(EMPTY_RESULT.to_owned())
                        } else {
                            value
                        }
                    }
                    Err(err) if err.is_recoverable_call_failure() => {
                        tracing::warn!("tool call `{}` failed: {}", call.full_name(), err);
                        Value::String(format!("Error: {err}"))
                    }
                    Err(err) => return Err(err),
                };
                results.push(ChatMessage::tool_result(FunctionResultContent::for_call(
                    call, value,
                )));
            }

            if self.behavior.choice() == FunctionChoice::Required {
                exhausted.extend(calls.iter().map(|call| call.full_name()));
            }
            history.extend(messages);
            history.extend(results.clone());

            if terminate {
                tracing::info!("tool-call loop terminated by a hook at round {}", round);
                span.finish();
                return Ok(OrchestratorResponse {
                    messages: results,
                    rounds: round,
                    usage,
                    terminated: true,
                });
            }
        }

        tracing::warn!("no final answer after {} rounds", max_rounds);
        Err(KernelError::RoundLimitExceeded { max_rounds })
    }

    async fn complete(
        &self,
        service: &dyn ChatCompletionService,
        history: &ChatHistory,
        request: &ChatRequest,
    ) -> KernelResult<Vec<ChatMessage>> {
        let messages = if self.config.streaming {
            let stream = service
                .get_streaming_chat_message_contents(history, request)
                .await?;
            vec![drain(stream).await?]
        } else {
            service.get_chat_message_contents(history, request).await?
        };
        if messages.is_empty() {
            return Err(KernelError::Service(format!(
                "`{}` returned no messages",
                service.model_id()
            )));
        }
        Ok(messages)
    }

    /// Executes the calls and returns their outcomes in call order. Sequential
    /// execution stops at the first failure that ends the loop.
    async fn execute_calls(
        &self,
        calls: &[FunctionCallContent],
        functions: &[Arc<dyn KernelFunction>],
        arguments: Option<&KernelArguments>,
        hooks: &KernelHooks,
    ) -> Vec<KernelResult<InvocationOutcome>> {
        let invocations = calls.iter().zip(functions).map(|(call, function)| {
            let arguments = call_arguments(arguments, call);
            async move { invoke_function(self.kernel, function.as_ref(), &arguments, hooks).await }
        });
        if self.config.concurrent_calls {
            return future::join_all(invocations).await;
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for invocation in invocations {
            let outcome = invocation.await;
            let fatal = matches!(&outcome, Err(err) if !err.is_recoverable_call_failure());
            outcomes.push(outcome);
            if fatal {
                break;
            }
        }
        outcomes
    }
}

fn call_arguments(base: Option<&KernelArguments>, call: &FunctionCallContent) -> KernelArguments {
    let mut arguments = base.cloned().unwrap_or_default();
    for (name, value) in &call.arguments {
        arguments.insert(name.clone(), value.clone());
    }
    arguments
}

impl std::fmt::Debug for ToolCallOrchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallOrchestrator")
            .field("behavior", &self.behavior)
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Builder for [`ToolCallOrchestrator`].
#[derive(Default)]
pub struct ToolCallOrchestratorBuilder<'a> {
    kernel: Option<&'a Kernel>,
    behavior: Option<FunctionChoiceBehavior>,
    config: Option<OrchestratorConfig>,
    hooks: KernelHooks,
}

impl<'a> ToolCallOrchestratorBuilder<'a> {
    /// Sets the kernel providing functions, services and global hooks.
    pub fn kernel(mut self, kernel: &'a Kernel) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Sets the function choice behavior.
    pub fn behavior(mut self, behavior: FunctionChoiceBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Overrides the loop settings of the kernel configuration.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds a hook that only applies to this orchestrator, after the global ones.
    pub fn hook<H: Hook + 'static>(mut self, name: &str, hook: H) -> Self {
        self.hooks.add_hook(hook, Some(name));
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> KernelResult<ToolCallOrchestrator<'a>> {
        let kernel = self.kernel.ok_or_else(|| {
            KernelError::Configuration("the orchestrator requires a kernel".to_owned())
        })?;
        let behavior = self.behavior.ok_or_else(|| {
            KernelError::Configuration(
                "the orchestrator requires a function choice behavior".to_owned(),
            )
        })?;
        let config = self
            .config
            .unwrap_or_else(|| kernel.config().orchestrator.clone());
        config.validate()?;
        Ok(ToolCallOrchestrator {
            kernel,
            behavior,
            config,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{KernelPlugin, NativeFunction, ParameterMetadata};
    use crate::hooks::hook_fn;
    use parking_lot::Mutex;
    use serde_json::Map;
    use std::collections::VecDeque;

    struct QueuedService {
        responses: Mutex<VecDeque<ChatMessage>>,
    }

    impl QueuedService {
        fn new(responses: Vec<ChatMessage>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatCompletionService for QueuedService {
        fn model_id(&self) -> &str {
            "queued"
        }

        async fn get_chat_message_contents(
            &self,
            _history: &ChatHistory,
            _request: &ChatRequest,
        ) -> KernelResult<Vec<ChatMessage>> {
            let message = self
                .responses
                .lock()
                .pop_front()
                .ok_or_else(|| KernelError::Service("no scripted response".to_owned()))?;
            Ok(vec![message])
        }
    }

    fn call(id: &str, name: &str) -> FunctionCallContent {
        let mut arguments = Map::new();
        arguments.insert("text".to_owned(), "hi".into());
        FunctionCallContent::new(id, name, arguments)
    }

    fn kernel(responses: Vec<ChatMessage>) -> Kernel {
        let echo = NativeFunction::builder("echo")
            .parameter(ParameterMetadata::new("text").type_name("string").required())
            .sync_handler(|arguments| Ok(arguments.get("text").cloned().unwrap_or_default()))
            .build()
            .unwrap();
        let fail = NativeFunction::builder("fail")
            .sync_handler(|_| {
                Err(crate::function::FunctionError::ExecutionFailed(
                    "boom".to_owned(),
                ))
            })
            .build()
            .unwrap();
        let plugin = KernelPlugin::new("text")
            .with_function(echo)
            .unwrap()
            .with_function(fail)
            .unwrap();
        Kernel::builder()
            .plugin(plugin)
            .service(QueuedService::new(responses))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_inputs() {
        let kernel = kernel(Vec::new());
        let err = ToolCallOrchestrator::builder()
            .behavior(FunctionChoiceBehavior::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, KernelError::Configuration(_)));
        let err = ToolCallOrchestrator::builder()
            .kernel(&kernel)
            .build()
            .unwrap_err();
        assert!(matches!(err, KernelError::Configuration(_)));
        let orchestrator = ToolCallOrchestrator::builder()
            .kernel(&kernel)
            .behavior(FunctionChoiceBehavior::default())
            .build()
            .unwrap();
        assert_eq!(orchestrator.config().max_rounds, 5);
    }

    #[tokio::test]
    async fn test_failed_call_is_reported_to_the_model() {
        let kernel = kernel(vec![
            ChatMessage::function_calls(vec![call("call_1", "text-fail")]),
            ChatMessage::assistant("sorry"),
        ]);
        let orchestrator = ToolCallOrchestrator::builder()
            .kernel(&kernel)
            .behavior(FunctionChoiceBehavior::default())
            .build()
            .unwrap();
        let mut history = ChatHistory::new();
        history.add_user_message("fail please");
        let response = orchestrator.invoke(&mut history, None).await.unwrap();
        assert_eq!(response.text().as_deref(), Some("sorry"));
        assert_eq!(response.rounds, 2);
        let result = history.messages()[2].results().next().unwrap();
        let text = result.result_text().unwrap();
        assert!(text.starts_with("Error: FunctionExecutionError"), "{text}");
    }

    #[tokio::test]
    async fn test_unknown_function_is_fatal() {
        let kernel = kernel(vec![ChatMessage::function_calls(vec![call(
            "call_1",
            "text-missing",
        )])]);
        let orchestrator = ToolCallOrchestrator::builder()
            .kernel(&kernel)
            .behavior(FunctionChoiceBehavior::default())
            .build()
            .unwrap();
        let mut history = ChatHistory::new();
        history.add_user_message("hi");
        let err = orchestrator.invoke(&mut history, None).await.unwrap_err();
        match err {
            KernelError::FunctionNotFound { full_name, call_id } => {
                assert_eq!(full_name, "text-missing");
                assert_eq!(call_id.as_deref(), Some("call_1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_terminate_hook_stops_the_loop() {
        let kernel = kernel(vec![
            ChatMessage::function_calls(vec![call("call_1", "text-echo")]),
            ChatMessage::assistant("never sent"),
        ]);
        let orchestrator = ToolCallOrchestrator::builder()
            .kernel(&kernel)
            .behavior(FunctionChoiceBehavior::default())
            .hook(
                "stop",
                hook_fn(HookKind::FunctionInvoked, |event| match event {
                    HookEvent::FunctionInvoked(mut e) => {
                        e.terminate = true;
                        Ok(HookEvent::FunctionInvoked(e))
                    }
                    other => Ok(other),
                }),
            )
            .build()
            .unwrap();
        let mut history = ChatHistory::new();
        history.add_user_message("echo hi");
        let response = orchestrator.invoke(&mut history, None).await.unwrap();
        assert!(response.terminated);
        assert_eq!(response.rounds, 1);
        assert_eq!(history.len(), 3);
        let result = response.messages[0].results().next().unwrap();
        assert_eq!(result.result_text().as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_caller_arguments_are_overlaid() {
        let kernel = kernel(vec![
            ChatMessage::function_calls(vec![FunctionCallContent::new(
                "call_1",
                "text-echo",
                Map::new(),
            )]),
            ChatMessage::assistant("done"),
        ]);
        let orchestrator = ToolCallOrchestrator::builder()
            .kernel(&kernel)
            .behavior(FunctionChoiceBehavior::default())
            .build()
            .unwrap();
        let mut history = ChatHistory::new();
        history.add_user_message("echo");
        let arguments = KernelArguments::new().with_value("text", "from caller");
        orchestrator
            .invoke(&mut history, Some(&arguments))
            .await
            .unwrap();
        let result = history.messages()[2].results().next().unwrap();
        assert_eq!(result.result_text().as_deref(), Some("from caller"));
    }
}
