//! Function and parameter metadata.

use super::arguments::{ExecutionSettings, KernelArguments};
use crate::error::{KernelError, KernelResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator between the plugin name and the function name in a full name.
///
/// Names may only contain ASCII alphanumerics and `_`, so splitting on the first
/// separator always recovers the original pair.
pub const FULL_NAME_SEPARATOR: &str = "-";

/// Joins a plugin name and a function name into a full name.
pub fn join_full_name(plugin_name: Option<&str>, function_name: &str) -> String {
    match plugin_name {
        Some(plugin_name) if !plugin_name.is_empty() => {
            format!("{plugin_name}{FULL_NAME_SEPARATOR}{function_name}")
        }
        _ => function_name.to_owned(),
    }
}

/// Splits a full name into the plugin name and the function name.
pub fn split_full_name(full_name: &str) -> (Option<&str>, &str) {
    match full_name.split_once(FULL_NAME_SEPARATOR) {
        Some((plugin_name, function_name)) => (Some(plugin_name), function_name),
        None => (None, full_name),
    }
}

/// Checks that a plugin or function name is non-empty and made of `[A-Za-z0-9_]`.
pub fn validate_name(name: &str) -> KernelResult<()> {
    if name.is_empty() {
        return Err(KernelError::Configuration("name must not be empty".to_owned()));
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
    {
        return Err(KernelError::Configuration(format!(
            "invalid character `{ch}` in name `{name}`"
        )));
    }
    Ok(())
}

/// Metadata of a function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    /// Parameter name.
    pub name: String,
    /// Parameter description.
    #[serde(default)]
    pub description: String,
    /// Whether the caller must supply the argument.
    #[serde(default)]
    pub is_required: bool,
    /// Value substituted when the argument is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Declared type name, e.g. `integer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// JSON schema of the parameter, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl ParameterMetadata {
    /// Creates an optional parameter without a declared type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_required: false,
            default_value: None,
            type_name: None,
            schema: None,
        }
    }

    /// Creates a parameter whose schema is derived from `T`.
    pub fn typed<T: JsonSchema>(name: impl Into<String>) -> Self {
        let mut schema = schemars::schema_for!(T).to_value();
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
        }
        let type_name = schema
            .get("type")
            .and_then(|v| v.as_str())
            .map(|s| s.to_owned())
            .unwrap_or_else(|| T::schema_name().into_owned());
        Self {
            type_name: Some(type_name),
            schema: Some(schema),
            ..Self::new(name)
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the parameter as required.
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Sets the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets the declared type name.
    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Returns the JSON schema advertised to a model.
    pub fn json_schema(&self) -> Value {
        let mut schema = match (&self.schema, &self.type_name) {
            (Some(schema), _) => schema.clone(),
            (None, Some(type_name)) => serde_json::json!({ "type": type_name }),
            (None, None) => serde_json::json!({}),
        };
        if let Some(object) = schema.as_object_mut() {
            if !self.description.is_empty() {
                object.insert("description".to_owned(), self.description.clone().into());
            }
            if let Some(default_value) = &self.default_value {
                object.insert("default".to_owned(), default_value.clone());
            }
        }
        schema
    }
}

/// Metadata of a kernel function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    /// Function name, unique within its plugin.
    pub name: String,
    /// Name of the owning plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    /// Function description.
    #[serde(default)]
    pub description: String,
    /// Ordered parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterMetadata>,
    /// Return type tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Execution settings used to pick a model service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_settings: Option<ExecutionSettings>,
}

impl FunctionMetadata {
    /// Creates metadata for a function without a plugin.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_name: None,
            description: String::new(),
            parameters: Vec::new(),
            return_type: None,
            execution_settings: None,
        }
    }

    /// Returns the full name `plugin-function`.
    #[inline]
    pub fn full_name(&self) -> String {
        join_full_name(self.plugin_name.as_deref(), &self.name)
    }

    /// Looks up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterMetadata> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Returns the JSON schema of the parameter object.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            properties.insert(parameter.name.clone(), parameter.json_schema());
            if parameter.is_required {
                required.push(Value::String(parameter.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Returns the definition advertised to a model.
    pub fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.full_name(),
            description: self.description.clone(),
            parameters: self.parameters_schema(),
        }
    }

    /// Binds the declared parameters against the supplied arguments.
    ///
    /// Missing optional arguments receive their default value. Arguments without
    /// a matching parameter are passed through.
    pub fn bind_arguments(&self, arguments: &KernelArguments) -> KernelResult<KernelArguments> {
        let mut bound = arguments.clone();
        for parameter in &self.parameters {
            match bound.get(&parameter.name) {
                Some(value) if !value.is_null() => {
                    if let Some(type_name) = parameter.type_name.as_deref() {
                        if !matches_type(type_name, value) {
                            return Err(KernelError::InvalidArgument {
                                function: self.full_name(),
                                parameter: parameter.name.clone(),
                                message: format!("expected {type_name}, got `{value}`"),
                            });
                        }
                    }
                    continue;
                }
                _ => {}
            }
            match &parameter.default_value {
                Some(default_value) => {
                    bound.insert(parameter.name.clone(), default_value.clone());
                }
                None if parameter.is_required => {
                    return Err(KernelError::MissingArgument {
                        function: self.full_name(),
                        parameter: parameter.name.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(bound)
    }
}

/// Checks a value against a JSON schema type name. Unknown type names accept anything.
fn matches_type(type_name: &str, value: &Value) -> bool {
    match type_name {
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// A function definition advertised to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Full name of the function.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON schema of the parameter object.
    pub parameters: Value,
}
