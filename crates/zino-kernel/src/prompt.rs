//! Model prompts exposed as kernel functions.

use crate::chat::ChatHistory;
use crate::error::{KernelError, KernelResult};
use crate::function::{
    ExecutionSettings, FunctionContext, FunctionMetadata, KernelArguments, KernelFunction,
    ParameterMetadata, value_to_text,
};
use crate::hooks::{HookEvent, PromptRenderedEvent, PromptRenderingEvent};
use crate::services::ChatRequest;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static VARIABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
        .unwrap_or_else(|err| panic!("invalid variable pattern: {err}"))
});

/// Substitutes `{{$name}}` variables. Missing variables render as empty text.
pub fn render_variables(template: &str, arguments: &KernelArguments) -> String {
    VARIABLE_PATTERN
        .replace_all(template, |captures: &Captures<'_>| {
            arguments
                .get(&captures[1])
                .map(value_to_text)
                .unwrap_or_default()
        })
        .into_owned()
}

/// A kernel function that renders a prompt and sends it to a chat service.
#[derive(Debug, Clone)]
pub struct PromptFunction {
    metadata: FunctionMetadata,
    template: String,
}

impl PromptFunction {
    /// Creates a prompt function. Every template variable becomes an optional parameter.
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> KernelResult<Self> {
        let name = name.into();
        crate::function::metadata::validate_name(&name)?;
        let template = template.into();
        let mut metadata = FunctionMetadata::new(name);
        metadata.return_type = Some("string".to_owned());
        for captures in VARIABLE_PATTERN.captures_iter(&template) {
            let variable = &captures[1];
            if metadata.parameter(variable).is_none() {
                metadata.parameters.push(ParameterMetadata::new(variable));
            }
        }
        Ok(Self { metadata, template })
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Declares a parameter, replacing the one derived from the template.
    pub fn parameter(mut self, parameter: ParameterMetadata) -> Self {
        self.metadata.parameters.retain(|p| p.name != parameter.name);
        self.metadata.parameters.push(parameter);
        self
    }

    /// Sets the settings used to select the model service.
    pub fn execution_settings(mut self, settings: ExecutionSettings) -> Self {
        self.metadata.execution_settings = Some(settings);
        self
    }

    /// Returns the template.
    #[inline]
    pub fn template(&self) -> &str {
        &self.template
    }
}

#[async_trait::async_trait]
impl KernelFunction for PromptFunction {
    fn metadata(&self) -> &FunctionMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut FunctionMetadata {
        &mut self.metadata
    }

    async fn execute(
        &self,
        context: FunctionContext<'_>,
        arguments: &KernelArguments,
    ) -> KernelResult<Value> {
        let event = HookEvent::PromptRendering(PromptRenderingEvent {
            function: self.metadata.clone(),
            arguments: arguments.clone(),
        });
        let arguments = match context.hooks.execute(event)? {
            HookEvent::PromptRendering(event) => event.arguments,
            _ => unreachable!("hooks preserve the event kind"),
        };

        let event = HookEvent::PromptRendered(PromptRenderedEvent {
            function: self.metadata.clone(),
            prompt: render_variables(&self.template, &arguments),
            arguments,
        });
        let (prompt, arguments) = match context.hooks.execute(event)? {
            HookEvent::PromptRendered(event) => (event.prompt, event.arguments),
            _ => unreachable!("hooks preserve the event kind"),
        };

        let selection = context
            .kernel
            .select_chat_service(Some(&self.metadata), Some(&arguments))?;
        let mut history = ChatHistory::new();
        history.add_user_message(prompt);
        let request = ChatRequest {
            settings: selection.settings,
            ..ChatRequest::default()
        };
        let messages = selection
            .service
            .get_chat_message_contents(&history, &request)
            .await?;
        let answer = messages
            .iter()
            .rev()
            .find_map(|message| message.content())
            .ok_or_else(|| KernelError::FunctionExecution {
                function: self.metadata.full_name(),
                message: "the model returned no text".to_owned(),
            })?;
        Ok(Value::String(answer))
    }
}
