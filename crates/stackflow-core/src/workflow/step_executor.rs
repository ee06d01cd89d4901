//! Step executor: one step, one attempt sequence, one `StepResult`.
//!
//! The action call goes through `ActionRegistry::execute_step_action`, is
//! wrapped in the circuit breaker for the step's resource, and that in turn
//! is wrapped in the retry policy. A rejection by an open breaker is not
//! retryable, so it fails the step straight away.

use std::sync::Arc;

use stackflow_types::error::ActionError;
use stackflow_types::workflow::{StepDefinition, StepResult};
use tokio::time::Instant;

use super::action::ActionRegistry;
use super::circuit_breaker::{CircuitBreakerRegistry, CircuitError};
use super::context::ExecutionContext;
use super::retry::{RetryPolicy, Retryable};

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can fail a step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The action handler reported a failure. Message kept verbatim.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// The breaker for the step's resource is open.
    #[error("circuit breaker open for resource '{resource}'")]
    CircuitOpen { resource: String },
}

impl Retryable for StepError {
    fn is_retryable(&self) -> bool {
        match self {
            StepError::Action(e) => e.is_retryable(),
            StepError::CircuitOpen { .. } => false,
        }
    }
}

impl From<CircuitError<ActionError>> for StepError {
    fn from(err: CircuitError<ActionError>) -> Self {
        match err {
            CircuitError::Open { resource } => StepError::CircuitOpen { resource },
            CircuitError::Inner(e) => StepError::Action(e),
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Runs single steps against the registered action handlers.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    actions: Arc<ActionRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(
        actions: Arc<ActionRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            actions,
            breakers,
            retry,
        }
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Retry policy for `step`: the step's own `retryCount` if set, otherwise
    /// the default budget.
    pub fn policy_for(&self, step: &StepDefinition) -> RetryPolicy {
        match step.retry_count {
            Some(n) => self.retry.clone().with_max_retries(n),
            None => self.retry.clone(),
        }
    }

    /// Execute one step and capture its outcome. Never fails: errors become
    /// a `failed` result carrying the error message.
    pub async fn execute_step(&self, step: &StepDefinition, ctx: &ExecutionContext) -> StepResult {
        let started = Instant::now();
        let outcome = self.run(step, ctx).await;
        let duration_ms = super::saturating_millis(started.elapsed());

        match outcome {
            Ok(value) => {
                tracing::debug!(step_id = %step.id, duration_ms, "step succeeded");
                StepResult::success(&step.id, value, duration_ms)
            }
            Err(e) => {
                tracing::warn!(step_id = %step.id, duration_ms, error = %e, "step failed");
                StepResult::failed(&step.id, e.to_string(), duration_ms)
            }
        }
    }

    async fn run(
        &self,
        step: &StepDefinition,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, StepError> {
        let resolved = StepDefinition {
            config: ctx.resolve_config(&step.config),
            ..step.clone()
        };
        let resource = self.actions.resource_key(&resolved);
        let breaker = self.breakers.get_or_create(&resource);

        tracing::debug!(
            step_id = %step.id,
            step_type = %step.step_type,
            %resource,
            "executing step"
        );

        let actions = &self.actions;
        self.policy_for(step)
            .run(|attempt| {
                tracing::trace!(step_id = %step.id, attempt, "step attempt");
                let breaker = &breaker;
                let resolved = &resolved;
                async move {
                    breaker
                        .call(|| actions.execute_step_action(resolved, ctx))
                        .await
                        .map_err(StepError::from)
                }
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::{json, Value};
    use stackflow_types::circuit::CircuitStatus;
    use stackflow_types::config::CircuitBreakerSettings;
    use stackflow_types::workflow::{StepStatus, StepType};

    use super::*;
    use crate::workflow::action::testing::{EchoHandler, PanicHandler, ScriptedHandler};

    fn executor(actions: ActionRegistry, threshold: u32) -> StepExecutor {
        StepExecutor::new(
            Arc::new(actions),
            Arc::new(CircuitBreakerRegistry::new(CircuitBreakerSettings {
                failure_threshold: threshold,
                reset_timeout_ms: 60_000,
            })),
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
        )
    }

    fn ctx() -> ExecutionContext {
        let mut vars = HashMap::new();
        vars.insert("target".to_string(), json!("https://shop.test"));
        ExecutionContext::new("wf", "exec", vars, 1)
    }

    fn nav(id: &str) -> StepDefinition {
        StepDefinition::new(id, StepType::Navigate, json!({"url": "$target"}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_carries_output() {
        let exec = executor(ActionRegistry::new().with(StepType::Navigate, EchoHandler), 5);
        let result = exec.execute_step(&nav("open"), &ctx()).await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.step_id, "open");
        assert_eq!(result.result, Some(json!({"url": "https://shop.test"})));
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_with_default_budget() {
        let handler = ScriptedHandler::always(Ok(json!("loaded")))
            .then(Err(ActionError::Timeout("page load".into())))
            .then(Err(ActionError::Network("reset".into())));
        let exec = executor(ActionRegistry::new().with(StepType::Navigate, handler.clone()), 10);

        let result = exec.execute_step(&nav("open"), &ctx()).await;
        assert!(result.is_success());
        assert_eq!(handler.call_count(), 3);
        // 100ms + 200ms of backoff
        assert_eq!(result.duration_ms, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_retry_count_overrides_default() {
        let handler = ScriptedHandler::always(Err(ActionError::Timeout("slow".into())));
        let exec = executor(ActionRegistry::new().with(StepType::Navigate, handler.clone()), 10);

        let result = exec.execute_step(&nav("open").with_retry_count(1), &ctx()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("timed out: slow"));
        assert_eq!(handler.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_immediately_with_verbatim_message() {
        let handler = ScriptedHandler::always(Err(ActionError::Failed("selector '#buy' not found".into())));
        let exec = executor(ActionRegistry::new().with(StepType::Navigate, handler.clone()), 10);

        let result = exec.execute_step(&nav("open"), &ctx()).await;
        assert_eq!(result.error.as_deref(), Some("selector '#buy' not found"));
        assert_eq!(handler.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_handler_fails_step() {
        let exec = executor(ActionRegistry::new(), 5);
        let step = StepDefinition::new("form", StepType::FillForm, Value::Null);

        let result = exec.execute_step(&step, &ctx()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("no action handler registered for step type 'fill-form'")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_stops_retries() {
        let handler = ScriptedHandler::always(Err(ActionError::Network("down".into())));
        let exec = executor(ActionRegistry::new().with(StepType::Navigate, handler.clone()), 2);

        let result = exec.execute_step(&nav("open"), &ctx()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("circuit breaker open for resource 'navigate'")
        );
        // Two failures open the breaker, the third attempt is rejected.
        assert_eq!(handler.call_count(), 2);
        assert_eq!(
            exec.breakers().snapshot("navigate").unwrap().state,
            CircuitStatus::Open
        );

        // A later step against the same resource fails fast.
        let result = exec.execute_step(&nav("again"), &ctx()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(handler.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_key_selects_breaker() {
        let handler = ScriptedHandler::always(Err(ActionError::Failed("nope".into()))).on_resource("chrome");
        let exec = executor(ActionRegistry::new().with(StepType::Navigate, handler), 5);

        exec.execute_step(&nav("open"), &ctx()).await;
        assert!(exec.breakers().snapshot("navigate").is_none());
        assert_eq!(exec.breakers().snapshot("chrome").unwrap().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_fails_step_and_counts_toward_breaker() {
        let exec = executor(ActionRegistry::new().with(StepType::Extract, PanicHandler), 2);
        let step = StepDefinition::new("grab", StepType::Extract, Value::Null);

        let result = exec.execute_step(&step, &ctx()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("action handler panicked: driver crashed")
        );
        let snap = exec.breakers().snapshot("extract").unwrap();
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.total_failures, 1);

        exec.execute_step(&step, &ctx()).await;
        assert_eq!(
            exec.breakers().snapshot("extract").unwrap().state,
            CircuitStatus::Open
        );
    }

    #[test]
    fn test_step_error_retry_classification() {
        assert!(StepError::Action(ActionError::Timeout("t".into())).is_retryable());
        assert!(!StepError::Action(ActionError::Validation("v".into())).is_retryable());
        assert!(!StepError::CircuitOpen { resource: "r".into() }.is_retryable());
    }
}
