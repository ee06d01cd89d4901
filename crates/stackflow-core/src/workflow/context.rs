//! Execution context with write-once step state and variable resolution.
//!
//! `ExecutionContext` is the mutable record that flows through one execution.
//! It holds the caller's input variables (read-only), the outputs of steps
//! that succeeded so far, and the progress counters that status pollers read.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::WorkflowError;

/// Prefix that routes a `$reference` to a recorded step output instead of
/// an input variable.
const STEP_REFERENCE_PREFIX: &str = "step_";

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-execution state owned by the engine for the lifetime of one run.
///
/// `variables` never change after construction, `state` is write-once per
/// step ID, and `current_step` only moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: String,
    variables: HashMap<String, Value>,
    state: HashMap<String, Value>,
    current_step: usize,
    total_steps: usize,
}

impl ExecutionContext {
    /// Create a context for an execution that has not started any step.
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        variables: HashMap<String, Value>,
        total_steps: usize,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            variables,
            state: HashMap::new(),
            current_step: 0,
            total_steps,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Outputs of the steps that succeeded so far, keyed by step ID.
    pub fn state(&self) -> &HashMap<String, Value> {
        &self.state
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.state.get(step_id)
    }

    /// 1-based index of the step in progress, `0` before the first step.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Store the output of a successful step.
    ///
    /// The value is stored verbatim. A second write for the same step ID is
    /// rejected and leaves the first value in place.
    pub fn record_step_output(&mut self, step_id: &str, output: Value) -> Result<(), WorkflowError> {
        if self.state.contains_key(step_id) {
            return Err(WorkflowError::OutputAlreadyRecorded(step_id.to_string()));
        }
        self.state.insert(step_id.to_string(), output);
        Ok(())
    }

    /// Move the progress counter to `step` (1-based). Never moves backwards.
    pub fn advance_to(&mut self, step: usize) -> Result<(), WorkflowError> {
        if step < self.current_step {
            return Err(WorkflowError::ProgressRegression {
                current: self.current_step,
                requested: step,
            });
        }
        self.current_step = step;
        Ok(())
    }

    /// Resolve `$name` references in a step configuration.
    ///
    /// A string leaf that is exactly `$step_<id>` is replaced by the recorded
    /// output of step `<id>`; any other `$name` leaf is replaced by the input
    /// variable `name`. References that cannot be resolved are left as-is.
    /// Objects and arrays are walked recursively; the input is not modified.
    pub fn resolve_config(&self, config: &Value) -> Value {
        match config {
            Value::String(s) => match s.strip_prefix('$') {
                Some(reference) => self
                    .lookup(reference)
                    .cloned()
                    .unwrap_or_else(|| config.clone()),
                None => config.clone(),
            },
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_config(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_config(v)).collect())
            }
            _ => config.clone(),
        }
    }

    fn lookup(&self, reference: &str) -> Option<&Value> {
        reference
            .strip_prefix(STEP_REFERENCE_PREFIX)
            .and_then(|step_id| self.state.get(step_id))
            .or_else(|| self.variables.get(reference))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
