//! Named groups of kernel functions.

use super::KernelFunction;
use super::metadata::validate_name;
use crate::error::{KernelError, KernelResult};
use std::sync::Arc;

/// A named collection of functions.
#[derive(Clone)]
pub struct KernelPlugin {
    name: String,
    description: String,
    functions: Vec<Arc<dyn KernelFunction>>,
}

impl KernelPlugin {
    /// Creates an empty plugin.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            functions: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a function and returns `self`.
    pub fn with_function<F>(mut self, function: F) -> KernelResult<Self>
    where
        F: KernelFunction + 'static,
    {
        self.add_function(function)?;
        Ok(self)
    }

    /// Adds a function, taking ownership of its plugin name.
    pub fn add_function<F>(&mut self, mut function: F) -> KernelResult<()>
    where
        F: KernelFunction + 'static,
    {
        validate_name(&self.name)?;
        let name = function.metadata().name.clone();
        if self.get(&name).is_some() {
            return Err(KernelError::Configuration(format!(
                "function `{name}` is already registered in plugin `{}`",
                self.name
            )));
        }
        function.metadata_mut().plugin_name = Some(self.name.clone());
        self.functions.push(Arc::new(function));
        Ok(())
    }

    /// Returns a function by its short name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn KernelFunction>> {
        self.functions.iter().find(|f| f.metadata().name == name)
    }

    /// Returns the plugin name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the plugin description.
    #[inline]
    pub fn plugin_description(&self) -> &str {
        &self.description
    }

    /// Returns the functions in insertion order.
    #[inline]
    pub fn functions(&self) -> &[Arc<dyn KernelFunction>] {
        &self.functions
    }

    /// Returns the number of functions.
    #[inline]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns `true` if the plugin has no functions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for KernelPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self
            .functions
            .iter()
            .map(|f| f.metadata().name.as_str())
            .collect::<Vec<_>>();
        f.debug_struct("KernelPlugin")
            .field("name", &self.name)
            .field("functions", &names)
            .finish()
    }
}
