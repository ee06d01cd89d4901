//! Workflow domain types for StackFlow.
//!
//! Defines the externally supplied workflow definition (an ordered list of
//! steps) and the execution records the engine produces for it: one
//! `StepResult` per executed step and one terminal `ExecutionResult` per run.
//! Wire names are camelCase so definitions authored for the browser extension
//! deserialize unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// An immutable, externally validated workflow definition.
///
/// Steps run strictly in declared order. Step ids must be unique and the list
/// must be non-empty for an execution to be accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Optional human-readable workflow name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of steps.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Build a definition from a list of steps.
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self {
            name: None,
            description: None,
            steps,
        }
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single unit of work dispatched to an action handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Step id, unique within a definition.
    pub id: String,
    /// Human-readable step name.
    #[serde(default)]
    pub name: String,
    /// The kind of action this step performs.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Action-specific configuration, passed to the handler after `$var` resolution.
    #[serde(default)]
    pub config: Value,
    /// Per-step retry budget. Falls back to the engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl StepDefinition {
    /// Convenience constructor used by tests and programmatic callers.
    pub fn new(id: impl Into<String>, step_type: StepType, config: Value) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type,
            config,
            retry_count: None,
        }
    }

    /// Set an explicit retry budget for this step.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }
}

/// The closed set of step kinds the engine can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    /// Open a page / URL.
    Navigate,
    /// Pull data out of the current page.
    Extract,
    /// Fill and submit a form.
    FillForm,
    /// Reshape data produced by earlier steps.
    TransformData,
    /// Send a notification to an external channel.
    Notify,
}

impl StepType {
    /// All step types, in declaration order.
    pub const ALL: [StepType; 5] = [
        StepType::Navigate,
        StepType::Extract,
        StepType::FillForm,
        StepType::TransformData,
        StepType::Notify,
    ];

    /// Wire name of this step type.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Navigate => "navigate",
            StepType::Extract => "extract",
            StepType::FillForm => "fill-form",
            StepType::TransformData => "transform-data",
            StepType::Notify => "notify",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "navigate" => Ok(StepType::Navigate),
            "extract" => Ok(StepType::Extract),
            "fill-form" => Ok(StepType::FillForm),
            "transform-data" => Ok(StepType::TransformData),
            "notify" => Ok(StepType::Notify),
            other => Err(format!("invalid step type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Step Result
// ---------------------------------------------------------------------------

/// Outcome of one step's attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Immutable record emitted once per executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent on the step, retries and backoff included.
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Success,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            result: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Execution Result
// ---------------------------------------------------------------------------

/// Terminal status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every declared step ran and succeeded.
    Completed,
    /// The engine rejected or aborted the run before (or outside) step execution.
    Failed,
    /// At least one step ran but the sequence halted early.
    Partial,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Partial => write!(f, "partial"),
        }
    }
}

/// The single terminal record produced by one `execute()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Step results in execution order.
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A `failed` result carrying no step results.
    pub fn rejected(execution_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Failed,
            steps: Vec::new(),
            duration_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Number of steps that finished with `success`.
    pub fn completed_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_success()).count()
    }

    /// The first failed step, if any.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
