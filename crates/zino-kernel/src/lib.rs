#![doc = include_str!("../README.md")]
#![doc(html_favicon_url = "https://zino.cc/assets/zino-logo.png")]
#![doc(html_logo_url = "https://zino.cc/assets/zino-logo.svg")]

pub mod behavior;
pub mod chat;
pub mod config;
pub mod connectors;
pub mod error;
pub mod function;
pub mod hooks;
pub mod invocation;
pub mod kernel;
pub mod observe;
pub mod orchestrator;
pub mod prompt;
pub mod services;
pub mod streaming;

pub use behavior::{FunctionChoice, FunctionChoiceBehavior};
pub use chat::{AuthorRole, ChatHistory, ChatMessage};
pub use config::{KernelConfig, OrchestratorConfig};
pub use error::{ConversionError, KernelError, KernelResult};
pub use function::{KernelArguments, KernelFunction, KernelPlugin, NativeFunction};
pub use hooks::{Hook, HookEvent, HookKind, KernelHooks};
pub use kernel::{Kernel, KernelBuilder};
pub use orchestrator::{OrchestratorResponse, ToolCallOrchestrator};
pub use prompt::PromptFunction;
pub use services::{ChatCompletionService, ChatRequest};
