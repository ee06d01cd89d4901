//! Execution engine: drives a workflow's steps in declared order.
//!
//! # Execution flow
//!
//! 1. Check the step list (non-empty, unique IDs).
//! 2. Create the `ExecutionContext` and register it as in flight.
//! 3. For each step: advance progress, publish the context, run the step
//!    through the `StepExecutor`, record its result, and store its output
//!    on success. Halt on the first failed step.
//! 4. Release the registry slot and build the `ExecutionResult`.
//!
//! The caller always gets an `ExecutionResult`. Definition errors, duplicate
//! execution IDs and panics inside the engine all become a `failed` result.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use stackflow_types::circuit::CircuitSnapshot;
use stackflow_types::config::EngineConfig;
use stackflow_types::workflow::{
    ExecutionResult, ExecutionStatus, StepResult, WorkflowDefinition,
};
use tokio::time::Instant;

use super::action::{panic_message, ActionRegistry};
use super::circuit_breaker::CircuitBreakerRegistry;
use super::context::ExecutionContext;
use super::definition::{check_steps, WorkflowError};
use super::registry::ExecutionRegistry;
use super::retry::RetryPolicy;
use super::step_executor::StepExecutor;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors that stop an execution outside the per-step failure path.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("execution '{0}' is already in flight")]
    AlreadyRunning(String),
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    step_executor: StepExecutor,
    registry: Arc<ExecutionRegistry>,
}

impl ExecutionEngine {
    /// Build an engine over `actions` with the retry and breaker settings
    /// from `config`.
    pub fn new(actions: ActionRegistry, config: &EngineConfig) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone());
        Self::with_step_executor(StepExecutor::new(
            Arc::new(actions),
            Arc::new(breakers),
            RetryPolicy::from_settings(&config.retry),
        ))
    }

    pub fn with_step_executor(step_executor: StepExecutor) -> Self {
        Self {
            step_executor,
            registry: Arc::new(ExecutionRegistry::new()),
        }
    }

    /// Run `definition` to completion or to its first failed step.
    #[tracing::instrument(
        name = "execute",
        skip(self, definition, variables),
        fields(steps = definition.steps.len())
    )]
    pub async fn execute(
        &self,
        workflow_id: &str,
        execution_id: &str,
        definition: &WorkflowDefinition,
        variables: HashMap<String, Value>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut steps = Vec::with_capacity(definition.steps.len());

        let outcome = AssertUnwindSafe(self.run_steps(
            workflow_id,
            execution_id,
            definition,
            variables,
            &mut steps,
        ))
        .catch_unwind()
        .await;

        let duration_ms = super::saturating_millis(started.elapsed());
        let (status, error) = match outcome {
            Ok(Ok(())) => summarize(&steps, definition.steps.len()),
            Ok(Err(e)) if steps.is_empty() => {
                tracing::warn!(error = %e, "execution rejected");
                return ExecutionResult::rejected(execution_id, e.to_string(), duration_ms);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, steps_run = steps.len(), "execution aborted");
                (halted_status(&steps), Some(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "execution aborted by panic");
                (
                    halted_status(&steps),
                    Some(format!("internal engine error: {message}")),
                )
            }
        };

        tracing::info!(
            %status,
            steps_run = steps.len(),
            duration_ms,
            "execution finished"
        );

        ExecutionResult {
            execution_id: execution_id.to_string(),
            status,
            steps,
            duration_ms,
            error,
        }
    }

    async fn run_steps(
        &self,
        workflow_id: &str,
        execution_id: &str,
        definition: &WorkflowDefinition,
        variables: HashMap<String, Value>,
        steps: &mut Vec<StepResult>,
    ) -> Result<(), EngineError> {
        check_steps(definition)?;

        let mut ctx = ExecutionContext::new(
            workflow_id,
            execution_id,
            variables,
            definition.steps.len(),
        );
        let _registration = self
            .registry
            .register(ctx.clone())
            .ok_or_else(|| EngineError::AlreadyRunning(execution_id.to_string()))?;

        for (index, step) in definition.steps.iter().enumerate() {
            ctx.advance_to(index + 1)?;
            if !self.registry.refresh(&ctx) {
                tracing::debug!(step_id = %step.id, "execution cancelled, continuing untracked");
            }

            tracing::info!(
                step_id = %step.id,
                step = index + 1,
                total = definition.steps.len(),
                "starting step"
            );
            let result = self.step_executor.execute_step(step, &ctx).await;
            let output = result.is_success().then(|| result.result.clone()).flatten();
            let failed = !result.is_success();
            steps.push(result);

            if let Some(output) = output {
                ctx.record_step_output(&step.id, output)?;
                self.registry.refresh(&ctx);
            }

            if failed {
                tracing::info!(step_id = %step.id, "step failed, halting execution");
                break;
            }
        }

        Ok(())
    }

    /// Snapshot of an in-flight execution, or `None` once it has finished or
    /// been cancelled.
    pub fn get_execution_context(&self, execution_id: &str) -> Option<ExecutionContext> {
        self.registry.get(execution_id)
    }

    /// Abandon an in-flight execution.
    ///
    /// Best-effort: removes the bookkeeping entry only. A step already talking
    /// to its action handler runs to completion, and the execution still
    /// returns its result to the original caller. Returns `false` if the
    /// execution is unknown or already finished.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        let removed = self.registry.remove(execution_id);
        if removed {
            tracing::info!(execution_id, "execution cancelled");
        }
        removed
    }

    pub fn get_active_execution_count(&self) -> usize {
        self.registry.len()
    }

    pub fn circuit_snapshot(&self, resource: &str) -> Option<CircuitSnapshot> {
        self.step_executor.breakers().snapshot(resource)
    }

    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.step_executor.breakers().snapshots()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Overall status and error for a run that went through the step loop.
fn summarize(steps: &[StepResult], declared: usize) -> (ExecutionStatus, Option<String>) {
    if steps.len() == declared && steps.iter().all(StepResult::is_success) {
        return (ExecutionStatus::Completed, None);
    }

    let error = steps.iter().find(|s| !s.is_success()).map(|s| {
        format!(
            "step '{}' failed: {}",
            s.step_id,
            s.error.as_deref().unwrap_or("unknown error")
        )
    });

    (halted_status(steps), error)
}

/// Status of a run that stopped before reaching the end of its steps.
fn halted_status(steps: &[StepResult]) -> ExecutionStatus {
    if steps.is_empty() {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Partial
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
