//! Kernel configuration.

use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the tool-call loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of model rounds in one invocation.
    pub max_rounds: usize,
    /// Inactivity window after which a provider-call span closes itself, in milliseconds.
    pub span_idle_timeout_ms: u64,
    /// Runs the calls of one round concurrently. Results keep the call order.
    pub concurrent_calls: bool,
    /// Uses the streaming variant of the service and drains it before tool-call detection.
    pub streaming: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            span_idle_timeout_ms: 30_000,
            concurrent_calls: false,
            streaming: false,
        }
    }
}

impl OrchestratorConfig {
    /// Returns the span inactivity window.
    #[inline]
    pub fn span_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.span_idle_timeout_ms)
    }

    /// Checks the values.
    pub fn validate(&self) -> KernelResult<()> {
        if self.max_rounds == 0 {
            return Err(KernelError::Configuration(
                "`max_rounds` must be at least 1".to_owned(),
            ));
        }
        if self.span_idle_timeout_ms == 0 {
            return Err(KernelError::Configuration(
                "`span_idle_timeout_ms` must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Configuration of a kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Settings of the tool-call loop.
    pub orchestrator: OrchestratorConfig,
}

impl KernelConfig {
    /// Parses a TOML document.
    ///
    /// ```toml
    /// [orchestrator]
    /// max_rounds = 8
    /// ```
    pub fn from_toml_str(s: &str) -> KernelResult<Self> {
        let config = toml::from_str::<Self>(s)
            .map_err(|err| KernelError::Configuration(err.to_string()))?;
        config.orchestrator.validate()?;
        Ok(config)
    }
}
