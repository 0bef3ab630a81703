//! Native Rust functions exposed as kernel functions.

use super::metadata::validate_name;
use super::{
    FunctionContext, FunctionError, FunctionMetadata, KernelArguments, KernelFunction,
    ParameterMetadata,
};
use crate::error::{KernelError, KernelResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

type Handler =
    Arc<dyn Fn(KernelArguments) -> BoxFuture<'static, Result<Value, FunctionError>> + Send + Sync>;

/// A kernel function backed by a Rust closure.
#[derive(Clone)]
pub struct NativeFunction {
    metadata: FunctionMetadata,
    handler: Handler,
}

impl NativeFunction {
    /// Starts building a native function.
    pub fn builder(name: impl Into<String>) -> NativeFunctionBuilder {
        NativeFunctionBuilder {
            metadata: FunctionMetadata::new(name),
            handler: None,
        }
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[async_trait::async_trait]
impl KernelFunction for NativeFunction {
    fn metadata(&self) -> &FunctionMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut FunctionMetadata {
        &mut self.metadata
    }

    async fn execute(
        &self,
        _context: FunctionContext<'_>,
        arguments: &KernelArguments,
    ) -> KernelResult<Value> {
        (self.handler)(arguments.clone())
            .await
            .map_err(|err| KernelError::FunctionExecution {
                function: self.metadata.full_name(),
                message: err.to_string(),
            })
    }
}

/// Builder for [`NativeFunction`].
pub struct NativeFunctionBuilder {
    metadata: FunctionMetadata,
    handler: Option<Handler>,
}

impl NativeFunctionBuilder {
    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Appends a parameter.
    pub fn parameter(mut self, parameter: ParameterMetadata) -> Self {
        self.metadata.parameters.push(parameter);
        self
    }

    /// Sets the return type tag.
    pub fn returns(mut self, return_type: impl Into<String>) -> Self {
        self.metadata.return_type = Some(return_type.into());
        self
    }

    /// Sets an asynchronous handler.
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(KernelArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FunctionError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |arguments| handler(arguments).boxed()));
        self
    }

    /// Sets a synchronous handler.
    pub fn sync_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(KernelArguments) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.handler = Some(Arc::new(move |arguments| {
            let handler = handler.clone();
            async move { handler(arguments) }.boxed()
        }));
        self
    }

    /// Builds the function.
    pub fn build(self) -> KernelResult<NativeFunction> {
        validate_name(&self.metadata.name)?;
        let handler = self.handler.ok_or_else(|| {
            KernelError::Configuration(format!(
                "function `{}` has no handler",
                self.metadata.name
            ))
        })?;
        Ok(NativeFunction {
            metadata: self.metadata,
            handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_handler() {
        let err = NativeFunction::builder("add").build().unwrap_err();
        assert!(matches!(err, KernelError::Configuration(_)));

        let err = NativeFunction::builder("math-add")
            .sync_handler(|_| Ok(Value::Null))
            .build()
            .unwrap_err();
        assert!(matches!(err, KernelError::Configuration(_)));
    }

    #[test]
    fn test_build_metadata() {
        let function = NativeFunction::builder("add")
            .description("Adds two numbers")
            .parameter(ParameterMetadata::new("a").required())
            .returns("integer")
            .sync_handler(|_| Ok(Value::Null))
            .build()
            .unwrap();
        let metadata = function.metadata();
        assert_eq!(metadata.name, "add");
        assert_eq!(metadata.parameters.len(), 1);
        assert_eq!(metadata.return_type.as_deref(), Some("integer"));
    }
}
