//! Kernel functions and their registry.
//!
//! A kernel function is anything the model can ask to run: native Rust code
//! ([`NativeFunction`]) or a model prompt ([`PromptFunction`](crate::prompt::PromptFunction)).
//! Functions are grouped into [`KernelPlugin`]s and looked up by their full name
//! `plugin-function` through the [`FunctionRegistry`].

use crate::error::KernelResult;
use crate::hooks::KernelHooks;
use crate::kernel::Kernel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod arguments;
pub mod metadata;
pub mod native;
pub mod plugin;
pub mod registry;

pub use arguments::{ExecutionSettings, KernelArguments};
pub use metadata::{
    FULL_NAME_SEPARATOR, FunctionDefinition, FunctionMetadata, ParameterMetadata, join_full_name,
    split_full_name,
};
pub use native::NativeFunction;
pub use plugin::KernelPlugin;
pub use registry::FunctionRegistry;

/// Errors raised by native function handlers.
#[derive(Debug, Error)]
pub enum FunctionError {
    /// The arguments could not be used.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// The function failed.
    #[error("Function execution failed: {0}")]
    ExecutionFailed(String),
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Context handed to a function while it executes.
#[derive(Clone, Copy)]
pub struct FunctionContext<'a> {
    /// The kernel that owns the function.
    pub kernel: &'a Kernel,
    /// Hooks active for this invocation, global ones first.
    pub hooks: &'a KernelHooks,
}

/// The value produced by a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    /// Metadata of the function that produced the value.
    pub function: FunctionMetadata,
    /// The produced value.
    pub value: Value,
    /// Extra data attached by the function or by hooks.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl FunctionResult {
    /// Creates a new result.
    pub fn new(function: FunctionMetadata, value: Value) -> Self {
        Self {
            function,
            value,
            metadata: Map::new(),
        }
    }

    /// Renders the value as text: strings verbatim, everything else as JSON.
    pub fn text(&self) -> String {
        value_to_text(&self.value)
    }
}

/// Renders a JSON value as text: strings verbatim, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Trait for invocable kernel functions.
#[async_trait::async_trait]
pub trait KernelFunction: Send + Sync {
    /// Returns the function metadata.
    fn metadata(&self) -> &FunctionMetadata;

    /// Returns the metadata mutably, used when the function joins a plugin.
    fn metadata_mut(&mut self) -> &mut FunctionMetadata;

    /// Executes the function with arguments that have already been bound.
    async fn execute(
        &self,
        context: FunctionContext<'_>,
        arguments: &KernelArguments,
    ) -> KernelResult<Value>;

    /// Returns the full name `plugin-function`.
    fn full_name(&self) -> String {
        self.metadata().full_name()
    }
}
