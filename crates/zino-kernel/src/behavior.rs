//! Function choice policies.

use crate::function::{FunctionDefinition, FunctionRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// How the model may use advertised functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionChoice {
    /// The model may answer or call functions.
    Auto,
    /// The model must call one of the functions.
    Required,
    /// Functions are described but never invoked.
    None,
}

impl FunctionChoice {
    /// Returns the choice as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionChoice::Auto => "auto",
            FunctionChoice::Required => "required",
            FunctionChoice::None => "none",
        }
    }
}

/// An immutable policy for advertising and invoking functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionChoiceBehavior {
    choice: FunctionChoice,
    auto_invoke: bool,
    /// Full names of the advertised functions; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    functions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    options: Map<String, Value>,
}

impl FunctionChoiceBehavior {
    /// The model may call any of the given functions, or all if `functions` is `None`.
    pub fn auto(auto_invoke: bool, functions: Option<Vec<String>>) -> Self {
        Self {
            choice: FunctionChoice::Auto,
            auto_invoke,
            functions,
            options: Map::new(),
        }
    }

    /// The model must call one of the given functions.
    pub fn required(auto_invoke: bool, functions: Option<Vec<String>>) -> Self {
        Self {
            choice: FunctionChoice::Required,
            auto_invoke,
            functions,
            options: Map::new(),
        }
    }

    /// Functions are described to the model but never invoked.
    pub fn none(functions: Option<Vec<String>>) -> Self {
        Self {
            choice: FunctionChoice::None,
            auto_invoke: false,
            functions,
            options: Map::new(),
        }
    }

    /// Returns a copy carrying a provider option.
    pub fn with_option(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut behavior = self.clone();
        behavior.options.insert(key.into(), value.into());
        behavior
    }

    /// Returns the choice.
    #[inline]
    pub fn choice(&self) -> FunctionChoice {
        self.choice
    }

    /// Returns `true` if tool calls are executed by the kernel.
    #[inline]
    pub fn auto_invoke(&self) -> bool {
        self.auto_invoke && self.choice != FunctionChoice::None
    }

    /// Returns the filter of advertised full names.
    #[inline]
    pub fn functions(&self) -> Option<&[String]> {
        self.functions.as_deref()
    }

    /// Returns the provider options.
    #[inline]
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// Returns `true` if the function passes the filter.
    pub fn allows(&self, full_name: &str) -> bool {
        self.functions
            .as_ref()
            .is_none_or(|functions| functions.iter().any(|f| f == full_name))
    }

    /// Returns the definitions to advertise, leaving out `exhausted` full names.
    pub fn advertised_functions(
        &self,
        registry: &FunctionRegistry,
        exhausted: &HashSet<String>,
    ) -> Vec<FunctionDefinition> {
        registry.definitions(|metadata| {
            let full_name = metadata.full_name();
            self.allows(&full_name) && !exhausted.contains(&full_name)
        })
    }
}

impl Default for FunctionChoiceBehavior {
    fn default() -> Self {
        Self::auto(true, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{KernelPlugin, NativeFunction};

    fn registry() -> FunctionRegistry {
        let mut plugin = KernelPlugin::new("math");
        for name in ["add", "sub", "mul"] {
            let function = NativeFunction::builder(name)
                .sync_handler(|_| Ok(Value::Null))
                .build()
                .unwrap();
            plugin.add_function(function).unwrap();
        }
        let mut registry = FunctionRegistry::new();
        registry.add_plugin(plugin).unwrap();
        registry
    }

    #[test]
    fn test_filtered_functions() {
        let registry = registry();
        let behavior =
            FunctionChoiceBehavior::auto(true, Some(vec!["math-add".into(), "math-mul".into()]));
        let names = behavior
            .advertised_functions(&registry, &HashSet::new())
            .into_iter()
            .map(|d| d.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["math-add", "math-mul"]);

        let exhausted = HashSet::from(["math-add".to_owned()]);
        let names = behavior
            .advertised_functions(&registry, &exhausted)
            .into_iter()
            .map(|d| d.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["math-mul"]);
    }

    #[test]
    fn test_none_never_invokes() {
        let behavior = FunctionChoiceBehavior::none(None);
        assert!(!behavior.auto_invoke());
        assert_eq!(behavior.choice().as_str(), "none");
        assert_eq!(
            behavior
                .advertised_functions(&registry(), &HashSet::new())
                .len(),
            3
        );
    }

    #[test]
    fn test_with_option_keeps_original() {
        let behavior = FunctionChoiceBehavior::required(true, None);
        let tuned = behavior.with_option("parallel_tool_calls", false);
        assert!(behavior.options().is_empty());
        assert_eq!(tuned.options()["parallel_tool_calls"], false);
        assert_eq!(tuned.choice(), FunctionChoice::Required);
    }
}
