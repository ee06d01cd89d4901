//! Workflow definition parsing and validation.
//!
//! Converts JSON or YAML documents into the canonical `WorkflowDefinition`
//! and validates the structural constraints the engine relies on
//! (non-empty step list, unique and non-empty step IDs).

use std::collections::HashSet;
use std::path::Path;

use stackflow_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A step output was already recorded for this step ID.
    #[error("output for step '{0}' is already recorded")]
    OutputAlreadyRecorded(String),

    /// Attempted to move the progress counter backwards.
    #[error("cannot move progress from step {current} back to step {requested}")]
    ProgressRegression { current: usize, requested: usize },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON string into a validated `WorkflowDefinition`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse a YAML string into a validated `WorkflowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - At least one step exists
/// - Every step ID is non-empty
/// - All step IDs are unique
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    check_steps(def)?;

    if let Some(position) = def.steps.iter().position(|s| s.id.trim().is_empty()) {
        return Err(WorkflowError::ValidationError(format!(
            "step {} has an empty ID",
            position + 1
        )));
    }

    Ok(())
}

/// The two constraints the engine refuses to run without: a non-empty step
/// list and unique step IDs.
pub(crate) fn check_steps(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a file.
///
/// `.json` files are parsed as JSON, `.yaml`/`.yml` as YAML. Any other
/// extension is rejected.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => parse_workflow_json(&std::fs::read_to_string(path)?),
        Some("yaml" | "yml") => parse_workflow_yaml(&std::fs::read_to_string(path)?),
        _ => Err(WorkflowError::ParseError(format!(
            "unsupported workflow file extension: {}",
            path.display()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackflow_types::workflow::{StepDefinition, StepType};
    use tempfile::TempDir;

    fn step(id: &str) -> StepDefinition {
        StepDefinition::new(id, StepType::Navigate, json!({"url": "https://example.com"}))
    }

    #[test]
    fn test_parse_json_definition() {
        let json = r##"{
            "name": "price-watch",
            "steps": [
                {"id": "open", "name": "Open page", "type": "navigate", "config": {"url": "https://shop.test"}},
                {"id": "grab", "name": "Grab price", "type": "extract", "config": {"selector": "#price"}, "retryCount": 1}
            ]
        }"##;

        let def = parse_workflow_json(json).unwrap();
        assert_eq!(def.name.as_deref(), Some("price-watch"));
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[1].step_type, StepType::Extract);
        assert_eq!(def.steps[1].retry_count, Some(1));
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
name: notify-team
steps:
  - id: shape
    name: Shape payload
    type: transform-data
    config:
      select: [title]
  - id: ping
    name: Ping webhook
    type: notify
    config:
      webhookUrl: https://hooks.test/abc
      payload: $step_shape
"#;

        let def = parse_workflow_yaml(yaml).unwrap();
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].step_type, StepType::TransformData);
        assert_eq!(def.steps[1].config["payload"], "$step_shape");
        assert_eq!(def.steps[1].retry_count, None);
    }

    #[test]
    fn test_parse_rejects_malformed_document() {
        let result = parse_workflow_json("{\"steps\": [");
        assert!(matches!(result, Err(WorkflowError::ParseError(_))));
    }

    #[test]
    fn test_validation_rejects_empty_workflow() {
        let def = WorkflowDefinition::new(vec![]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_validation_rejects_duplicate_step_ids() {
        let def = WorkflowDefinition::new(vec![step("a"), step("b"), step("a")]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID: 'a'"));
    }

    #[test]
    fn test_validation_rejects_blank_step_id() {
        let def = WorkflowDefinition::new(vec![step("a"), step("  ")]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("step 2 has an empty ID"));
    }

    #[test]
    fn test_load_workflow_file_by_extension() {
        let dir = TempDir::new().unwrap();

        let json_path = dir.path().join("flow.json");
        std::fs::write(
            &json_path,
            r#"{"steps": [{"id": "a", "type": "navigate", "config": {"url": "https://a.test"}}]}"#,
        )
        .unwrap();
        assert_eq!(load_workflow_file(&json_path).unwrap().steps.len(), 1);

        let yaml_path = dir.path().join("flow.yml");
        std::fs::write(&yaml_path, "steps:\n  - id: a\n    type: notify\n").unwrap();
        assert_eq!(
            load_workflow_file(&yaml_path).unwrap().steps[0].step_type,
            StepType::Notify
        );
    }

    #[test]
    fn test_load_workflow_file_rejects_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flow.txt");
        std::fs::write(&path, "steps: []").unwrap();

        assert!(matches!(
            load_workflow_file(&path),
            Err(WorkflowError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = load_workflow_file(&dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(WorkflowError::IoError(_))));
    }
}
