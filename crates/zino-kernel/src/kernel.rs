//! The kernel: registered functions, model services and global hooks.

use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::function::{
    FunctionMetadata, FunctionRegistry, FunctionResult, KernelArguments, KernelPlugin,
};
use crate::hooks::{Hook, KernelHooks};
use crate::invocation::invoke_function;
use crate::services::{
    AiServiceSelection, AiServiceSelector, ChatCompletionService, OrderedAiServiceSelector,
    ServiceType,
};
use std::sync::Arc;

/// Composition root holding plugins, services and global hooks.
pub struct Kernel {
    registry: FunctionRegistry,
    services: Vec<Arc<dyn ChatCompletionService>>,
    selector: Arc<dyn AiServiceSelector>,
    hooks: KernelHooks,
    config: KernelConfig,
}

impl Kernel {
    /// Starts building a kernel.
    #[inline]
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// Returns the function registry.
    #[inline]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Returns the registered services.
    #[inline]
    pub fn services(&self) -> &[Arc<dyn ChatCompletionService>] {
        &self.services
    }

    /// Returns the global hooks.
    #[inline]
    pub fn hooks(&self) -> &KernelHooks {
        &self.hooks
    }

    /// Adds a global hook and returns its name.
    pub fn add_hook<H: Hook + 'static>(&mut self, hook: H, name: Option<&str>) -> String {
        self.hooks.add_hook(hook, name)
    }

    /// Removes a global hook by name.
    pub fn remove_hook(&mut self, name: &str) -> bool {
        self.hooks.remove_hook(name)
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Selects a chat completion service for a function and its arguments.
    pub fn select_chat_service(
        &self,
        function: Option<&FunctionMetadata>,
        arguments: Option<&KernelArguments>,
    ) -> KernelResult<AiServiceSelection> {
        self.selector.try_select_ai_service(
            ServiceType::ChatCompletion,
            function,
            arguments,
            &self.services,
        )
    }

    /// Invokes a function by full name with the global hooks.
    pub async fn invoke(
        &self,
        full_name: &str,
        arguments: &KernelArguments,
    ) -> KernelResult<FunctionResult> {
        self.invoke_with_hooks(full_name, arguments, &KernelHooks::new())
            .await
    }

    /// Invokes a function by full name with the global hooks followed by `hooks`.
    pub async fn invoke_with_hooks(
        &self,
        full_name: &str,
        arguments: &KernelArguments,
        hooks: &KernelHooks,
    ) -> KernelResult<FunctionResult> {
        let function = self.registry.resolve(full_name, None)?;
        let hooks = KernelHooks::merge(&self.hooks, hooks);
        let outcome = invoke_function(self, function.as_ref(), arguments, &hooks).await?;
        Ok(outcome.result)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let models = self
            .services
            .iter()
            .map(|s| s.model_id())
            .collect::<Vec<_>>();
        f.debug_struct("Kernel")
            .field("registry", &self.registry)
            .field("services", &models)
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`Kernel`].
#[derive(Default)]
pub struct KernelBuilder {
    plugins: Vec<KernelPlugin>,
    services: Vec<Arc<dyn ChatCompletionService>>,
    selector: Option<Arc<dyn AiServiceSelector>>,
    hooks: KernelHooks,
    config: KernelConfig,
}

impl KernelBuilder {
    /// Adds a plugin.
    pub fn plugin(mut self, plugin: KernelPlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Adds a chat completion service.
    pub fn service<S: ChatCompletionService + 'static>(mut self, service: S) -> Self {
        self.services.push(Arc::new(service));
        self
    }

    /// Adds a shared chat completion service.
    pub fn shared_service(mut self, service: Arc<dyn ChatCompletionService>) -> Self {
        self.services.push(service);
        self
    }

    /// Replaces the default service selector.
    pub fn selector<S: AiServiceSelector + 'static>(mut self, selector: S) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Adds a named global hook.
    pub fn hook<H: Hook + 'static>(mut self, name: &str, hook: H) -> Self {
        self.hooks.add_hook(hook, Some(name));
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the kernel.
    pub fn build(self) -> KernelResult<Kernel> {
        self.config.orchestrator.validate()?;
        let mut registry = FunctionRegistry::new();
        for plugin in self.plugins {
            registry.add_plugin(plugin)?;
        }
        tracing::debug!(
            "kernel built with {} functions and {} services",
            registry.len(),
            self.services.len()
        );
        Ok(Kernel {
            registry,
            services: self.services,
            selector: self
                .selector
                .unwrap_or_else(|| Arc::new(OrderedAiServiceSelector)),
            hooks: self.hooks,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::function::NativeFunction;
    use crate::hooks::{HookEvent, HookKind, hook_fn};
    use serde_json::json;

    fn kernel() -> Kernel {
        let greet = NativeFunction::builder("greet")
            .sync_handler(|args| {
                let name = args.parse::<String>("name")?;
                Ok(json!(format!("hello {name}")))
            })
            .build()
            .unwrap();
        Kernel::builder()
            .plugin(KernelPlugin::new("text").with_function(greet).unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_by_full_name() {
        let kernel = kernel();
        let arguments = KernelArguments::new().with_value("name", "zino");
        let result = kernel.invoke("text-greet", &arguments).await.unwrap();
        assert_eq!(result.text(), "hello zino");
        assert_eq!(result.function.full_name(), "text-greet");

        let err = kernel.invoke("text-missing", &arguments).await.unwrap_err();
        assert!(matches!(err, KernelError::FunctionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_global_hooks_apply() {
        let mut kernel = kernel();
        kernel.add_hook(
            hook_fn(HookKind::FunctionInvoked, |event| match event {
                HookEvent::FunctionInvoked(mut e) => {
                    e.result.value = json!("[redacted]");
                    Ok(HookEvent::FunctionInvoked(e))
                }
                other => Ok(other),
            }),
            Some("redact"),
        );
        let arguments = KernelArguments::new().with_value("name", "zino");
        let result = kernel.invoke("text-greet", &arguments).await.unwrap();
        assert_eq!(result.text(), "[redacted]");

        assert!(kernel.remove_hook("redact"));
        let result = kernel.invoke("text-greet", &arguments).await.unwrap();
        assert_eq!(result.text(), "hello zino");
    }

    #[test]
    fn test_build_rejects_duplicates() {
        let plugin = KernelPlugin::new("text");
        let result = Kernel::builder()
            .plugin(plugin.clone())
            .plugin(plugin)
            .build();
        assert!(result.is_err());
    }
}
