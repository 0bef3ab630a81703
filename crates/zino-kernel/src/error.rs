//! Error types for the kernel.
//!
//! Every fallible operation in this crate returns [`KernelResult`]. The variants of
//! [`KernelError`] fall into five groups: configuration, resolution, conversion,
//! cancellation and the round limit of the tool-call loop.

use thiserror::Error;

/// Errors raised while converting between the common chat model and a provider wire format.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// A tool call has no call identifier.
    #[error("ConversionError: tool call `{function}` has no call id")]
    MissingCallId {
        /// Full name of the called function.
        function: String,
    },
    /// A tool result has no call identifier to correlate with.
    #[error("ConversionError: tool result of `{function}` has no call id")]
    MissingResultCallId {
        /// Function name carried by the result, if any.
        function: String,
    },
    /// A tool result has no result value.
    #[error("ConversionError: tool result for call `{call_id}` is empty")]
    MissingResult {
        /// Identifier of the originating call.
        call_id: String,
    },
    /// A tool call has no function name.
    #[error("ConversionError: tool call at index {index} has no function name")]
    MissingFunctionName {
        /// Position of the call in the provider output.
        index: usize,
    },
    /// A message has no content the wire format can carry.
    #[error("ConversionError: `{role}` message has no content")]
    EmptyMessage {
        /// Role of the message.
        role: String,
    },
    /// A wire role could not be mapped to an author role.
    #[error("ConversionError: unknown role `{0}`")]
    UnknownRole(String),
    /// Arguments of a tool call are not a JSON object.
    #[error("ConversionError: invalid arguments for `{function}`: {message}")]
    InvalidArguments {
        /// Full name of the called function.
        function: String,
        /// Parser message.
        message: String,
    },
    /// Inline binary data is not valid base64.
    #[error("ConversionError: invalid inline data: {0}")]
    InvalidInlineData(String),
    /// Malformed JSON payload.
    #[error("ConversionError: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A required builder input is missing or invalid.
    #[error("ConfigurationError: {0}")]
    Configuration(String),
    /// No function is registered under the requested full name.
    #[error("FunctionNotFound: `{full_name}` (call id: {call_id:?})")]
    FunctionNotFound {
        /// Requested full name.
        full_name: String,
        /// Identifier of the tool call that asked for it.
        call_id: Option<String>,
    },
    /// No registered service matches the request.
    #[error("ServiceNotFound: no `{service_type}` service (model id: {model_id:?})")]
    ServiceNotFound {
        /// Requested service type.
        service_type: String,
        /// Requested model id, if any.
        model_id: Option<String>,
    },
    /// A required argument is missing and the parameter has no default.
    #[error("MissingArgument: `{parameter}` is required by `{function}`")]
    MissingArgument {
        /// Full name of the function.
        function: String,
        /// Name of the missing parameter.
        parameter: String,
    },
    /// An argument could not be used by the function.
    #[error("InvalidArgument: `{parameter}` of `{function}`: {message}")]
    InvalidArgument {
        /// Full name of the function.
        function: String,
        /// Name of the parameter.
        parameter: String,
        /// Reason.
        message: String,
    },
    /// The function ran and failed.
    #[error("FunctionExecutionError: `{function}`: {message}")]
    FunctionExecution {
        /// Full name of the function.
        function: String,
        /// Failure message.
        message: String,
    },
    /// A hook aborted the pipeline.
    #[error("HookError: `{hook}` aborted `{event}`: {message}")]
    Hook {
        /// Name of the hook.
        hook: String,
        /// Event tag the hook was handling.
        event: String,
        /// Message raised by the hook.
        message: String,
    },
    /// A function invocation was cancelled before execution.
    #[error("Cancelled: `{function}`: {reason}")]
    Cancelled {
        /// Full name of the function.
        function: String,
        /// Reason reported by the cancelling hook.
        reason: String,
    },
    /// The tool-call loop ran out of rounds without a final answer.
    #[error("RoundLimitExceeded: no final answer after {max_rounds} rounds")]
    RoundLimitExceeded {
        /// Configured round ceiling.
        max_rounds: usize,
    },
    /// Two histories do not share a common prefix.
    #[error("HistoryMismatch: histories diverge at message {index}")]
    HistoryMismatch {
        /// Index of the first differing message.
        index: usize,
    },
    /// The provider service failed.
    #[error("ServiceError: {0}")]
    Service(String),
    /// Wire conversion failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// JSON error.
    #[error("JsonError: {0}")]
    Json(#[from] serde_json::Error),
}

impl KernelError {
    /// Returns `true` if a hook cancelled a function invocation or aborted a round.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Hook { .. })
    }

    /// Returns `true` if the tool-call loop hit its round ceiling.
    #[inline]
    pub fn is_round_limit(&self) -> bool {
        matches!(self, Self::RoundLimitExceeded { .. })
    }

    /// Returns `true` for failures a model can recover from when they are reported
    /// back as a tool result.
    pub(crate) fn is_recoverable_call_failure(&self) -> bool {
        matches!(
            self,
            Self::FunctionExecution { .. }
                | Self::MissingArgument { .. }
                | Self::InvalidArgument { .. }
        )
    }
}

/// Result type for the kernel.
pub type KernelResult<T> = Result<T, KernelError>;
