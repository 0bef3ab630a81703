//! Argument bag passed to kernel functions.

use super::FunctionError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hints used to select and configure a model service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Requested service id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Requested model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Provider specific options such as `temperature`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ExecutionSettings {
    /// Creates settings that request a model id.
    pub fn with_model_id(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Self::default()
        }
    }

    /// Creates settings that request a service id.
    pub fn with_service_id(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            ..Self::default()
        }
    }
}

/// Named arguments of a function call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelArguments {
    values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_settings: Option<ExecutionSettings>,
}

impl KernelArguments {
    /// Creates an empty argument bag.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value and returns `self`.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Attaches execution settings.
    pub fn with_execution_settings(mut self, settings: ExecutionSettings) -> Self {
        self.execution_settings = Some(settings);
        self
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    /// Returns the value of an argument.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Deserializes an argument into `T`.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> Result<T, FunctionError> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| FunctionError::InvalidArguments(format!("missing `{name}`")))?;
        serde_json::from_value(value.clone())
            .map_err(|err| FunctionError::InvalidArguments(format!("`{name}`: {err}")))
    }

    /// Returns `true` if the argument exists.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns the argument values.
    #[inline]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Returns the execution settings.
    #[inline]
    pub fn execution_settings(&self) -> Option<&ExecutionSettings> {
        self.execution_settings.as_ref()
    }

    /// Returns the number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for KernelArguments {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            execution_settings: None,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for KernelArguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values: Map<String, Value> = iter
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::from(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_argument() {
        let arguments = KernelArguments::from_iter([("a", 2), ("b", 3)]);
        assert_eq!(arguments.parse::<i64>("a").unwrap(), 2);
        assert!(arguments.parse::<String>("a").is_err());
        assert!(arguments.parse::<i64>("c").is_err());
        assert_eq!(arguments.len(), 2);
    }
}
