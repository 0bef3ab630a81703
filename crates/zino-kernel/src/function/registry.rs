//! Function registry for looking up functions by full name.

use super::{FunctionDefinition, FunctionMetadata, KernelFunction, KernelPlugin, join_full_name};
use crate::error::{KernelError, KernelResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of plugins and their functions.
///
/// Functions keep the order in which their plugins were added, so the set advertised
/// to a model is deterministic.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    plugins: Vec<KernelPlugin>,
    /// Full names in registration order.
    order: Vec<String>,
    /// Map of full names to functions.
    functions: HashMap<String, Arc<dyn KernelFunction>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin and all of its functions.
    pub fn add_plugin(&mut self, plugin: KernelPlugin) -> KernelResult<()> {
        if self.plugin(plugin.name()).is_some() {
            return Err(KernelError::Configuration(format!(
                "plugin `{}` is already registered",
                plugin.name()
            )));
        }
        for function in plugin.functions() {
            let full_name = function.full_name();
            if self.functions.contains_key(&full_name) {
                return Err(KernelError::Configuration(format!(
                    "function `{full_name}` is already registered"
                )));
            }
        }
        for function in plugin.functions() {
            let full_name = function.full_name();
            self.order.push(full_name.clone());
            self.functions.insert(full_name, function.clone());
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Returns a plugin by name.
    pub fn plugin(&self, name: &str) -> Option<&KernelPlugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Returns the registered plugins.
    #[inline]
    pub fn plugins(&self) -> &[KernelPlugin] {
        &self.plugins
    }

    /// Returns a function by full name.
    pub fn get(&self, full_name: &str) -> Option<Arc<dyn KernelFunction>> {
        self.functions.get(full_name).cloned()
    }

    /// Returns a function by plugin name and function name.
    pub fn get_function(&self, plugin_name: &str, name: &str) -> Option<Arc<dyn KernelFunction>> {
        self.get(&join_full_name(Some(plugin_name), name))
    }

    /// Resolves a function requested by a tool call.
    pub fn resolve(
        &self,
        full_name: &str,
        call_id: Option<&str>,
    ) -> KernelResult<Arc<dyn KernelFunction>> {
        self.get(full_name)
            .ok_or_else(|| KernelError::FunctionNotFound {
                full_name: full_name.to_owned(),
                call_id: call_id.map(|s| s.to_owned()),
            })
    }

    /// Checks if a function is registered.
    #[inline]
    pub fn contains(&self, full_name: &str) -> bool {
        self.functions.contains_key(full_name)
    }

    /// Returns all full names in registration order.
    #[inline]
    pub fn full_names(&self) -> &[String] {
        &self.order
    }

    /// Returns metadata of all functions in registration order.
    pub fn metadata(&self) -> Vec<&FunctionMetadata> {
        self.iter().map(|f| f.metadata()).collect()
    }

    /// Returns definitions of the functions accepted by `filter`.
    pub fn definitions<F>(&self, mut filter: F) -> Vec<FunctionDefinition>
    where
        F: FnMut(&FunctionMetadata) -> bool,
    {
        self.iter()
            .map(|f| f.metadata())
            .filter(|metadata| filter(metadata))
            .map(|metadata| metadata.definition())
            .collect()
    }

    /// Iterates over functions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn KernelFunction>> {
        self.order
            .iter()
            .filter_map(|full_name| self.functions.get(full_name))
    }

    /// Returns the number of functions.
    #[inline]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns `true` if no functions are registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("function_count", &self.functions.len())
            .field("function_names", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::NativeFunction;
    use serde_json::Value;

    fn plugin(name: &str, functions: &[&str]) -> KernelPlugin {
        functions.iter().fold(KernelPlugin::new(name), |plugin, function| {
            let function = NativeFunction::builder(*function)
                .sync_handler(|_| Ok(Value::Null))
                .build()
                .unwrap();
            plugin.with_function(function).unwrap()
        })
    }

    #[test]
    fn test_lookup_by_full_name() {
        let mut registry = FunctionRegistry::new();
        registry.add_plugin(plugin("math", &["add", "sub"])).unwrap();
        registry.add_plugin(plugin("time", &["now"])).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.full_names(), ["math-add", "math-sub", "time-now"]);
        assert!(registry.get("math-add").is_some());
        assert!(registry.get_function("time", "now").is_some());
        assert!(registry.contains("math-sub"));

        let definitions = registry.definitions(|m| m.plugin_name.as_deref() == Some("math"));
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name, "math-add");
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = FunctionRegistry::new();
        let err = registry.resolve("math-mul", Some("call_9")).err().unwrap();
        match err {
            KernelError::FunctionNotFound { full_name, call_id } => {
                assert_eq!(full_name, "math-mul");
                assert_eq!(call_id.as_deref(), Some("call_9"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_plugin() {
        let mut registry = FunctionRegistry::new();
        registry.add_plugin(plugin("math", &["add"])).unwrap();
        assert!(registry.add_plugin(plugin("math", &["mul"])).is_err());
        assert_eq!(registry.len(), 1);
    }
}
