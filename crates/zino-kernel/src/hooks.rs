//! Hook pipeline around function invocation, prompt rendering and chat completion.
//!
//! Hooks are named handlers registered against exactly one [`HookKind`]. Running the
//! pipeline threads an event through every handler of its kind in registration order;
//! each handler returns the event to pass on, possibly replaced. A handler error stops
//! the chain.

use crate::chat::{ChatHistory, ChatMessage};
use crate::error::{KernelError, KernelResult};
use crate::function::{
    ExecutionSettings, FunctionDefinition, FunctionMetadata, FunctionResult, KernelArguments,
};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle points a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Before a function executes.
    FunctionInvoking,
    /// After a function executed.
    FunctionInvoked,
    /// Before a prompt is rendered.
    PromptRendering,
    /// After a prompt was rendered.
    PromptRendered,
    /// Before a chat completion request.
    PreChatCompletion,
    /// After a chat completion response.
    PostChatCompletion,
}

impl HookKind {
    /// All kinds in lifecycle order.
    pub const ALL: [HookKind; 6] = [
        HookKind::FunctionInvoking,
        HookKind::FunctionInvoked,
        HookKind::PromptRendering,
        HookKind::PromptRendered,
        HookKind::PreChatCompletion,
        HookKind::PostChatCompletion,
    ];

    /// Returns the event tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::FunctionInvoking => "function-invoking",
            HookKind::FunctionInvoked => "function-invoked",
            HookKind::PromptRendering => "prompt-rendering",
            HookKind::PromptRendered => "prompt-rendered",
            HookKind::PreChatCompletion => "pre-chat-completion",
            HookKind::PostChatCompletion => "post-chat-completion",
        }
    }
}

impl FromStr for HookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown hook event `{s}`"))
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data of the `function-invoking` event.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInvokingEvent {
    /// The function about to run.
    pub function: FunctionMetadata,
    /// Bound arguments; hooks may rewrite them.
    pub arguments: KernelArguments,
}

/// Data of the `function-invoked` event.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInvokedEvent {
    /// The function that ran.
    pub function: FunctionMetadata,
    /// Arguments it ran with.
    pub arguments: KernelArguments,
    /// The produced result; hooks may replace it.
    pub result: FunctionResult,
    /// Set by a hook to stop the tool-call loop after the current round.
    pub terminate: bool,
}

/// Data of the `prompt-rendering` event.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRenderingEvent {
    /// The prompt function.
    pub function: FunctionMetadata,
    /// Arguments used for rendering.
    pub arguments: KernelArguments,
}

/// Data of the `prompt-rendered` event.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRenderedEvent {
    /// The prompt function.
    pub function: FunctionMetadata,
    /// Arguments used for rendering.
    pub arguments: KernelArguments,
    /// The rendered prompt; hooks may rewrite it.
    pub prompt: String,
}

/// Data of the `pre-chat-completion` event.
#[derive(Debug, Clone, PartialEq)]
pub struct PreChatCompletionEvent {
    /// History about to be sent.
    pub history: ChatHistory,
    /// Functions advertised for this request.
    pub functions: Vec<FunctionDefinition>,
    /// Request settings.
    pub settings: ExecutionSettings,
}

/// Data of the `post-chat-completion` event.
#[derive(Debug, Clone, PartialEq)]
pub struct PostChatCompletionEvent {
    /// Messages returned by the provider.
    pub messages: Vec<ChatMessage>,
}

/// An event passed through the hook pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// See [`FunctionInvokingEvent`].
    FunctionInvoking(FunctionInvokingEvent),
    /// See [`FunctionInvokedEvent`].
    FunctionInvoked(FunctionInvokedEvent),
    /// See [`PromptRenderingEvent`].
    PromptRendering(PromptRenderingEvent),
    /// See [`PromptRenderedEvent`].
    PromptRendered(PromptRenderedEvent),
    /// See [`PreChatCompletionEvent`].
    PreChatCompletion(PreChatCompletionEvent),
    /// See [`PostChatCompletionEvent`].
    PostChatCompletion(PostChatCompletionEvent),
}

impl HookEvent {
    /// Returns the kind of the event.
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::FunctionInvoking(_) => HookKind::FunctionInvoking,
            HookEvent::FunctionInvoked(_) => HookKind::FunctionInvoked,
            HookEvent::PromptRendering(_) => HookKind::PromptRendering,
            HookEvent::PromptRendered(_) => HookKind::PromptRendered,
            HookEvent::PreChatCompletion(_) => HookKind::PreChatCompletion,
            HookEvent::PostChatCompletion(_) => HookKind::PostChatCompletion,
        }
    }
}

/// Error raised by a hook to abort the pipeline.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Creates a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A lifecycle interceptor.
pub trait Hook: Send + Sync {
    /// The event kind this hook handles.
    fn kind(&self) -> HookKind;

    /// Handles an event and returns the event to pass on.
    fn handle(&self, event: HookEvent) -> Result<HookEvent, HookError>;
}

struct FnHook<F> {
    kind: HookKind,
    handler: F,
}

impl<F> Hook for FnHook<F>
where
    F: Fn(HookEvent) -> Result<HookEvent, HookError> + Send + Sync,
{
    fn kind(&self) -> HookKind {
        self.kind
    }

    fn handle(&self, event: HookEvent) -> Result<HookEvent, HookError> {
        (self.handler)(event)
    }
}

/// Creates a hook from a closure.
pub fn hook_fn<F>(kind: HookKind, handler: F) -> impl Hook
where
    F: Fn(HookEvent) -> Result<HookEvent, HookError> + Send + Sync,
{
    FnHook { kind, handler }
}

#[derive(Clone)]
struct NamedHook {
    name: String,
    hook: Arc<dyn Hook>,
}

/// An ordered set of named hooks.
#[derive(Clone, Default)]
pub struct KernelHooks {
    hooks: Vec<NamedHook>,
}

impl KernelHooks {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges two sets, global hooks first.
    pub fn merge(global: &KernelHooks, local: &KernelHooks) -> KernelHooks {
        let mut hooks = Vec::with_capacity(global.len() + local.len());
        hooks.extend(global.hooks.iter().cloned());
        hooks.extend(local.hooks.iter().cloned());
        KernelHooks { hooks }
    }

    /// Adds a hook and returns its name.
    ///
    /// A hook with an existing name replaces the old one in place. Unnamed hooks get
    /// a generated name.
    pub fn add_hook<H: Hook + 'static>(&mut self, hook: H, name: Option<&str>) -> String {
        let name = name
            .map(|s| s.to_owned())
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let hook: Arc<dyn Hook> = Arc::new(hook);
        match self.hooks.iter_mut().find(|h| h.name == name) {
            Some(existing) => existing.hook = hook,
            None => self.hooks.push(NamedHook {
                name: name.clone(),
                hook,
            }),
        }
        name
    }

    /// Adds a hook and returns `self`.
    pub fn with_hook<H: Hook + 'static>(mut self, name: &str, hook: H) -> Self {
        self.add_hook(hook, Some(name));
        self
    }

    /// Removes a hook by name.
    pub fn remove_hook(&mut self, name: &str) -> bool {
        let len = self.hooks.len();
        self.hooks.retain(|h| h.name != name);
        self.hooks.len() != len
    }

    /// Returns the hook names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name.as_str()).collect()
    }

    /// Returns `true` if a hook handles the given kind.
    pub fn handles(&self, kind: HookKind) -> bool {
        self.hooks.iter().any(|h| h.hook.kind() == kind)
    }

    /// Returns the number of hooks.
    #[inline]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` if there are no hooks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook of the event's kind in order.
    pub fn execute(&self, event: HookEvent) -> KernelResult<HookEvent> {
        let kind = event.kind();
        let mut event = event;
        for named in self.hooks.iter().filter(|h| h.hook.kind() == kind) {
            event = named.hook.handle(event).map_err(|err| {
                tracing::warn!("hook `{}` aborted `{}`: {}", named.name, kind, err);
                KernelError::Hook {
                    hook: named.name.clone(),
                    event: kind.to_string(),
                    message: err.to_string(),
                }
            })?;
            if event.kind() != kind {
                return Err(KernelError::Hook {
                    hook: named.name.clone(),
                    event: kind.to_string(),
                    message: format!("returned a `{}` event", event.kind()),
                });
            }
        }
        Ok(event)
    }
}

impl std::fmt::Debug for KernelHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHooks")
            .field("hooks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    fn rendered(prompt: &str) -> HookEvent {
        HookEvent::PromptRendered(PromptRenderedEvent {
            function: FunctionMetadata::new("summarize"),
            arguments: KernelArguments::new(),
            prompt: prompt.to_owned(),
        })
    }

    fn append(suffix: &'static str) -> impl Hook {
        hook_fn(HookKind::PromptRendered, move |event| match event {
            HookEvent::PromptRendered(mut event) => {
                event.prompt.push_str(suffix);
                Ok(HookEvent::PromptRendered(event))
            }
            other => Ok(other),
        })
    }

    #[test]
    fn test_kind_tags() {
        for kind in HookKind::ALL {
            assert_eq!(kind.as_str().parse::<HookKind>(), Ok(kind));
        }
        assert!("function-called".parse::<HookKind>().is_err());
    }

    #[test]
    fn test_empty_hooks_identity() {
        let merged = KernelHooks::merge(&KernelHooks::new(), &KernelHooks::new());
        assert!(merged.is_empty());

        let event = rendered("hello");
        assert_eq!(merged.execute(event.clone()).unwrap(), event);
    }

    #[test]
    fn test_merge_runs_global_first() {
        let global = KernelHooks::new().with_hook("global", append(" global"));
        let local = KernelHooks::new().with_hook("local", append(" local"));
        let merged = KernelHooks::merge(&global, &local);
        assert_eq!(merged.names(), ["global", "local"]);

        match merged.execute(rendered("hello")).unwrap() {
            HookEvent::PromptRendered(event) => assert_eq!(event.prompt, "hello global local"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_hooks_only_see_their_kind() {
        let hooks = KernelHooks::new().with_hook("suffix", append("!"));
        let event = HookEvent::PostChatCompletion(PostChatCompletionEvent {
            messages: vec![ChatMessage::assistant("4")],
        });
        assert_eq!(hooks.execute(event.clone()).unwrap(), event);
        assert!(hooks.handles(HookKind::PromptRendered));
        assert!(!hooks.handles(HookKind::FunctionInvoking));
    }

    #[test]
    fn test_error_stops_chain() {
        let mut hooks = KernelHooks::new();
        hooks.add_hook(
            hook_fn(HookKind::PromptRendered, |_| Err(HookError::new("redacted"))),
            Some("deny"),
        );
        hooks.add_hook(append(" never"), Some("after"));

        let err = hooks.execute(rendered("hello")).unwrap_err();
        match err {
            KernelError::Hook {
                hook,
                event,
                message,
            } => {
                assert_eq!(hook, "deny");
                assert_eq!(event, "prompt-rendered");
                assert_eq!(message, "redacted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut hooks = KernelHooks::new();
        let generated = hooks.add_hook(append("a"), None);
        hooks.add_hook(append("b"), Some("b"));
        hooks.add_hook(append("c"), Some("b"));
        assert_eq!(hooks.len(), 2);

        assert!(hooks.remove_hook(&generated));
        assert!(!hooks.remove_hook(&generated));
        match hooks.execute(rendered("")).unwrap() {
            HookEvent::PromptRendered(event) => assert_eq!(event.prompt, "c"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
