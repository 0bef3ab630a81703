//! The pipeline around one function execution.

use crate::error::{KernelError, KernelResult};
use crate::function::{FunctionContext, FunctionResult, KernelArguments, KernelFunction};
use crate::hooks::{FunctionInvokedEvent, FunctionInvokingEvent, HookEvent, KernelHooks};
use crate::kernel::Kernel;

/// The outcome of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    /// The result, possibly replaced by a `function-invoked` hook.
    pub result: FunctionResult,
    /// Set by a `function-invoked` hook to stop the tool-call loop.
    pub terminate: bool,
}

/// Invokes a function with hooks.
///
/// The steps are: bind the arguments, fire `function-invoking`, execute, fire
/// `function-invoked`. A `function-invoking` hook that raises cancels the
/// invocation and is reported as [`KernelError::Cancelled`]. A raising
/// `function-invoked` hook surfaces as [`KernelError::Hook`].
pub async fn invoke_function(
    kernel: &Kernel,
    function: &dyn KernelFunction,
    arguments: &KernelArguments,
    hooks: &KernelHooks,
) -> KernelResult<InvocationOutcome> {
    let metadata = function.metadata();
    let full_name = metadata.full_name();
    let arguments = metadata.bind_arguments(arguments)?;

    let event = HookEvent::FunctionInvoking(FunctionInvokingEvent {
        function: metadata.clone(),
        arguments,
    });
    let arguments = match hooks.execute(event) {
        Ok(HookEvent::FunctionInvoking(event)) => event.arguments,
        Ok(_) => unreachable!("hooks preserve the event kind"),
        Err(KernelError::Hook { message, .. }) => {
            tracing::info!("invocation of `{}` was cancelled: {}", full_name, message);
            return Err(KernelError::Cancelled {
                function: full_name,
                reason: message,
            });
        }
        Err(err) => return Err(err),
    };

    tracing::debug!("invoking `{}`", full_name);
    let context = FunctionContext { kernel, hooks };
    let value = function.execute(context, &arguments).await?;
    tracing::debug!("`{}` finished", full_name);

    let event = HookEvent::FunctionInvoked(FunctionInvokedEvent {
        function: metadata.clone(),
        arguments,
        result: FunctionResult::new(metadata.clone(), value),
        terminate: false,
    });
    match hooks.execute(event)? {
        HookEvent::FunctionInvoked(event) => Ok(InvocationOutcome {
            result: event.result,
            terminate: event.terminate,
        }),
        _ => unreachable!("hooks preserve the event kind"),
    }
}
