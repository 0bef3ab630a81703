//! Model service contract and service selection.

use crate::behavior::FunctionChoiceBehavior;
use crate::chat::{ChatHistory, ChatMessage, HistoryPolicy};
use crate::error::{KernelError, KernelResult};
use crate::function::{ExecutionSettings, FunctionDefinition, FunctionMetadata, KernelArguments};
use crate::streaming::{StreamingContent, StreamingResult};
use futures::stream;
use std::sync::Arc;

/// Kind of model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// Multi-turn chat completion.
    ChatCompletion,
    /// Single prompt text generation.
    TextGeneration,
}

impl ServiceType {
    /// Returns the service type as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ChatCompletion => "chat-completion",
            ServiceType::TextGeneration => "text-generation",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options of one chat completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    /// Functions advertised for this request.
    pub functions: Vec<FunctionDefinition>,
    /// Function choice policy, if functions are advertised.
    pub behavior: Option<FunctionChoiceBehavior>,
    /// Request settings.
    pub settings: ExecutionSettings,
}

/// A chat completion service backed by a model provider.
#[async_trait::async_trait]
pub trait ChatCompletionService: Send + Sync {
    /// Model served by this service.
    fn model_id(&self) -> &str;

    /// Service id used for explicit selection.
    fn service_id(&self) -> Option<&str> {
        None
    }

    /// Returns `true` if the service can act as the given type.
    fn supports(&self, service_type: ServiceType) -> bool {
        service_type == ServiceType::ChatCompletion
    }

    /// History merge policy of the underlying provider adapter.
    fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy::RequireCommon
    }

    /// Sends the history and returns the assistant messages of this round.
    async fn get_chat_message_contents(
        &self,
        history: &ChatHistory,
        request: &ChatRequest,
    ) -> KernelResult<Vec<ChatMessage>>;

    /// Streaming variant. The default replays the non-streaming response as chunks.
    async fn get_streaming_chat_message_contents(
        &self,
        history: &ChatHistory,
        request: &ChatRequest,
    ) -> KernelResult<StreamingResult> {
        let messages = self.get_chat_message_contents(history, request).await?;
        let chunks = messages
            .iter()
            .flat_map(StreamingContent::from_message)
            .map(Ok)
            .collect::<Vec<_>>();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// A selected service and the settings that led to it.
#[derive(Clone)]
pub struct AiServiceSelection {
    /// The selected service.
    pub service: Arc<dyn ChatCompletionService>,
    /// Effective settings, arguments taking precedence over the function.
    pub settings: ExecutionSettings,
}

impl std::fmt::Debug for AiServiceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiServiceSelection")
            .field("model_id", &self.service.model_id())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Strategy for picking a service.
pub trait AiServiceSelector: Send + Sync {
    /// Selects a service of `service_type`, narrowed by the hints of the function
    /// and the arguments.
    fn try_select_ai_service(
        &self,
        service_type: ServiceType,
        function: Option<&FunctionMetadata>,
        arguments: Option<&KernelArguments>,
        services: &[Arc<dyn ChatCompletionService>],
    ) -> KernelResult<AiServiceSelection>;
}

/// Picks the first registered service that matches the type and the hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedAiServiceSelector;

impl AiServiceSelector for OrderedAiServiceSelector {
    fn try_select_ai_service(
        &self,
        service_type: ServiceType,
        function: Option<&FunctionMetadata>,
        arguments: Option<&KernelArguments>,
        services: &[Arc<dyn ChatCompletionService>],
    ) -> KernelResult<AiServiceSelection> {
        let settings = arguments
            .and_then(|args| args.execution_settings())
            .or_else(|| function.and_then(|f| f.execution_settings.as_ref()))
            .cloned()
            .unwrap_or_default();
        let service = services
            .iter()
            .filter(|service| service.supports(service_type))
            .find(|service| {
                let service_matches = settings
                    .service_id
                    .as_deref()
                    .is_none_or(|id| service.service_id() == Some(id));
                let model_matches = settings
                    .model_id
                    .as_deref()
                    .is_none_or(|id| service.model_id() == id);
                service_matches && model_matches
            });
        match service {
            Some(service) => Ok(AiServiceSelection {
                service: service.clone(),
                settings,
            }),
            None => {
                tracing::warn!(
                    "no `{}` service matches model id {:?}",
                    service_type,
                    settings.model_id
                );
                Err(KernelError::ServiceNotFound {
                    service_type: service_type.to_string(),
                    model_id: settings.model_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoService {
        model_id: &'static str,
        service_id: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl ChatCompletionService for EchoService {
        fn model_id(&self) -> &str {
            self.model_id
        }

        fn service_id(&self) -> Option<&str> {
            self.service_id
        }

        async fn get_chat_message_contents(
            &self,
            history: &ChatHistory,
            _request: &ChatRequest,
        ) -> KernelResult<Vec<ChatMessage>> {
            let text = history
                .last_message()
                .and_then(|m| m.content())
                .unwrap_or_default();
            Ok(vec![ChatMessage::assistant(text).with_model_id(self.model_id)])
        }
    }

    fn services() -> Vec<Arc<dyn ChatCompletionService>> {
        vec![
            Arc::new(EchoService {
                model_id: "small",
                service_id: None,
            }),
            Arc::new(EchoService {
                model_id: "large",
                service_id: Some("primary"),
            }),
        ]
    }

    #[test]
    fn test_select_first_match() {
        let selection = OrderedAiServiceSelector
            .try_select_ai_service(ServiceType::ChatCompletion, None, None, &services())
            .unwrap();
        assert_eq!(selection.service.model_id(), "small");
    }

    #[test]
    fn test_select_by_hints() {
        let services = services();
        let arguments = KernelArguments::new()
            .with_execution_settings(ExecutionSettings::with_model_id("large"));
        let selection = OrderedAiServiceSelector
            .try_select_ai_service(ServiceType::ChatCompletion, None, Some(&arguments), &services)
            .unwrap();
        assert_eq!(selection.service.model_id(), "large");

        let mut function = FunctionMetadata::new("summarize");
        function.execution_settings = Some(ExecutionSettings::with_service_id("primary"));
        let selection = OrderedAiServiceSelector
            .try_select_ai_service(ServiceType::ChatCompletion, Some(&function), None, &services)
            .unwrap();
        assert_eq!(selection.service.model_id(), "large");
    }

    #[test]
    fn test_select_not_found() {
        let arguments = KernelArguments::new()
            .with_execution_settings(ExecutionSettings::with_model_id("missing"));
        let err = OrderedAiServiceSelector
            .try_select_ai_service(
                ServiceType::ChatCompletion,
                None,
                Some(&arguments),
                &services(),
            )
            .unwrap_err();
        match err {
            KernelError::ServiceNotFound {
                service_type,
                model_id,
            } => {
                assert_eq!(service_type, "chat-completion");
                assert_eq!(model_id.as_deref(), Some("missing"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = OrderedAiServiceSelector
            .try_select_ai_service(ServiceType::TextGeneration, None, None, &services())
            .unwrap_err();
        assert!(matches!(err, KernelError::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_default_streaming_replays_response() {
        let service = EchoService {
            model_id: "small",
            service_id: None,
        };
        let mut history = ChatHistory::new();
        history.add_user_message("ping");
        let stream = service
            .get_streaming_chat_message_contents(&history, &ChatRequest::default())
            .await
            .unwrap();
        let message = crate::streaming::drain(stream).await.unwrap();
        assert_eq!(message.content().as_deref(), Some("ping"));
        assert_eq!(message.model_id.as_deref(), Some("small"));
    }
}
