//! Action handlers: the seam where step implementations plug into the engine.
//!
//! Follows the same blanket-impl pattern used for other async ports:
//! 1. `ActionHandler` uses native async fn in trait (RPITIT)
//! 2. Object-safe `ActionHandlerDyn` with boxed futures, blanket-implemented
//! 3. `BoxActionHandler` wraps `Box<dyn ActionHandlerDyn>` and delegates
//!
//! `ActionRegistry` maps each `StepType` to exactly one handler. It is built
//! once at startup and shared read-only by every execution.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures_util::FutureExt;
use serde_json::Value;
use stackflow_types::error::ActionError;
use stackflow_types::workflow::{StepDefinition, StepType};

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// ActionHandler
// ---------------------------------------------------------------------------

/// Performs the work of one step type.
///
/// `step.config` has already had its `$references` resolved against the
/// execution context when `execute` is called.
pub trait ActionHandler: Send + Sync {
    /// Human-readable handler name for logs.
    fn name(&self) -> &str;

    /// Circuit-breaker resource this step targets. Defaults to the step type,
    /// so all steps of one type share a breaker.
    fn resource_key(&self, step: &StepDefinition) -> String {
        step.step_type.to_string()
    }

    fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;
}

/// Object-safe version of [`ActionHandler`] with boxed futures.
pub trait ActionHandlerDyn: Send + Sync {
    fn name(&self) -> &str;

    fn resource_key(&self, step: &StepDefinition) -> String;

    fn execute_boxed<'a>(
        &'a self,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn name(&self) -> &str {
        ActionHandler::name(self)
    }

    fn resource_key(&self, step: &StepDefinition) -> String {
        ActionHandler::resource_key(self, step)
    }

    fn execute_boxed<'a>(
        &'a self,
        step: &'a StepDefinition,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>> {
        Box::pin(self.execute(step, ctx))
    }
}

/// Type-erased action handler stored in the [`ActionRegistry`].
pub struct BoxActionHandler {
    inner: Box<dyn ActionHandlerDyn>,
}

impl BoxActionHandler {
    pub fn new<T: ActionHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn resource_key(&self, step: &StepDefinition) -> String {
        self.inner.resource_key(step)
    }

    pub async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        self.inner.execute_boxed(step, ctx).await
    }
}

impl std::fmt::Debug for BoxActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxActionHandler")
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Lookup table from step type to the handler that performs it.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    handlers: HashMap<StepType, BoxActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `step_type`, replacing any previous handler.
    pub fn register<T: ActionHandler + 'static>(&mut self, step_type: StepType, handler: T) {
        if let Some(previous) = self
            .handlers
            .insert(step_type, BoxActionHandler::new(handler))
        {
            tracing::debug!(%step_type, replaced = previous.name(), "action handler replaced");
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: ActionHandler + 'static>(mut self, step_type: StepType, handler: T) -> Self {
        self.register(step_type, handler);
        self
    }

    pub fn handler(&self, step_type: StepType) -> Option<&BoxActionHandler> {
        self.handlers.get(&step_type)
    }

    /// Step types with a registered handler, in declaration order.
    pub fn registered_types(&self) -> Vec<StepType> {
        StepType::ALL
            .iter()
            .copied()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    /// Circuit-breaker resource for `step`: the handler's key, or the step
    /// type when no handler is registered.
    pub fn resource_key(&self, step: &StepDefinition) -> String {
        match self.handler(step.step_type) {
            Some(handler) => handler.resource_key(step),
            None => step.step_type.to_string(),
        }
    }

    /// Dispatch `step` to the handler registered for its type.
    ///
    /// A step type without a handler fails with a non-retryable error. A
    /// handler that panics fails the step the same way instead of unwinding
    /// into the caller.
    pub async fn execute_step_action(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
    ) -> Result<Value, ActionError> {
        let Some(handler) = self.handler(step.step_type) else {
            return Err(ActionError::Failed(format!(
                "no action handler registered for step type '{}'",
                step.step_type
            )));
        };

        match AssertUnwindSafe(handler.execute(step, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    step_id = %step.id,
                    handler = handler.name(),
                    panic = %message,
                    "action handler panicked"
                );
                Err(ActionError::Failed(format!("action handler panicked: {message}")))
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
