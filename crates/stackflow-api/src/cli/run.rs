//! `stackflow run`: execute a workflow file against the built-in handlers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use stackflow_core::workflow::context::ExecutionContext;
use stackflow_core::workflow::engine::ExecutionEngine;
use stackflow_infra::action::builtin_registry;
use stackflow_types::circuit::{CircuitSnapshot, CircuitStatus};
use stackflow_types::workflow::{
    ExecutionResult, ExecutionStatus, StepResult, StepStatus, WorkflowDefinition,
};

/// How often the progress line polls the in-flight registry.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Args)]
pub struct RunArgs {
    /// Path to the workflow file (.json, .yaml or .yml).
    pub file: PathBuf,

    /// Set a workflow variable. VALUE is parsed as JSON, falling back to a plain string.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, Value)>,

    /// Read workflow variables from a JSON object file. `--var` entries win.
    #[arg(long, value_name = "FILE")]
    pub vars_file: Option<PathBuf>,

    /// Workflow ID recorded in the execution context (defaults to the file stem).
    #[arg(long)]
    pub workflow_id: Option<String>,

    /// Execution ID for this run (defaults to a fresh UUID v7).
    #[arg(long)]
    pub execution_id: Option<String>,

    /// Per-request timeout for the HTTP handlers, in seconds.
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub http_timeout: u64,

    /// Also print the circuit breaker state after the run.
    #[arg(long)]
    pub breakers: bool,
}

/// Parse a `KEY=VALUE` pair for `--var`.
pub fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Merge the variables file (if any) with the `--var` overrides.
fn collect_variables(args: &RunArgs) -> Result<HashMap<String, Value>> {
    let mut variables = HashMap::new();

    if let Some(path) = &args.vars_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read variables file '{}'", path.display()))?;
        let parsed: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in '{}'", path.display()))?;
        match parsed {
            Value::Object(map) => variables.extend(map),
            _ => bail!("Variables file '{}' must contain a JSON object", path.display()),
        }
    }

    variables.extend(args.vars.iter().cloned());
    Ok(variables)
}

/// Execute the workflow and print the result.
///
/// Returns the execution result so the caller can pick the exit code.
pub async fn handle_run(
    args: RunArgs,
    config_path: Option<&Path>,
    json: bool,
    quiet: bool,
) -> Result<ExecutionResult> {
    let definition = super::load_definition(&args.file)?;
    let variables = collect_variables(&args)?;
    let config = super::load_config(config_path).await;

    let actions = builtin_registry(Duration::from_secs(args.http_timeout))
        .context("Failed to initialize HTTP client")?;
    tracing::debug!(handlers = ?actions.registered_types(), "action handlers ready");
    let engine = ExecutionEngine::new(actions, &config);

    let workflow_id = args
        .workflow_id
        .clone()
        .unwrap_or_else(|| super::workflow_id_for(&args.file));
    let execution_id = args
        .execution_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    tracing::debug!(
        %workflow_id,
        %execution_id,
        steps = definition.steps.len(),
        "running workflow file"
    );

    let spinner = (!json && !quiet && console::Term::stderr().is_term()).then(|| {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Starting {}...", workflow_id));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    });

    let run = engine.execute(&workflow_id, &execution_id, &definition, variables);
    tokio::pin!(run);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = ticker.tick() => {
                if let (Some(spinner), Some(ctx)) =
                    (&spinner, engine.get_execution_context(&execution_id))
                {
                    spinner.set_message(progress_message(&definition, &ctx));
                }
            }
            Ok(()) = &mut ctrl_c => {
                engine.cancel_execution(&execution_id);
                if let Some(spinner) = &spinner {
                    spinner.finish_and_clear();
                }
                bail!("Execution '{execution_id}' cancelled");
            }
        }
    };

    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }

    let snapshots = if args.breakers {
        engine.circuit_snapshots()
    } else {
        Vec::new()
    };

    if json {
        let out = if args.breakers {
            serde_json::json!({ "result": result, "circuitBreakers": snapshots })
        } else {
            serde_json::to_value(&result)?
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        print_result(&workflow_id, &definition, &result);
        if args.breakers {
            print_breakers(&snapshots);
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn progress_message(definition: &WorkflowDefinition, ctx: &ExecutionContext) -> String {
    let name = ctx
        .current_step()
        .checked_sub(1)
        .and_then(|i| definition.steps.get(i))
        .map(|step| step.name.as_str())
        .unwrap_or("");
    format!(
        "[{}/{}] {}",
        ctx.current_step(),
        ctx.total_steps(),
        name
    )
}

fn print_result(workflow_id: &str, definition: &WorkflowDefinition, result: &ExecutionResult) {
    let marker = match result.status {
        ExecutionStatus::Completed => style("*").green().bold(),
        ExecutionStatus::Partial => style("!").yellow().bold(),
        ExecutionStatus::Failed => style("x").red().bold(),
    };

    println!();
    println!(
        "  {} Workflow '{}' {}",
        marker,
        style(workflow_id).cyan(),
        result.status
    );
    println!(
        "  Execution: {}",
        style(&result.execution_id).dim()
    );
    println!(
        "  Steps: {}/{} succeeded in {}ms",
        result.completed_step_count(),
        definition.steps.len(),
        result.duration_ms
    );
    if let Some(step) = result.failed_step() {
        println!("  Halted at: {}", style(&step.step_id).yellow());
    }
    if let Some(err) = &result.error {
        println!("  Error: {}", style(err).red());
    }

    if !result.steps.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Type"),
                Cell::new("Status"),
                Cell::new("Duration"),
                Cell::new("Output"),
            ]);

        for step in &result.steps {
            let step_type = definition
                .steps
                .iter()
                .find(|s| s.id == step.step_id)
                .map(|s| s.step_type.to_string())
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                Cell::new(&step.step_id),
                Cell::new(step_type),
                format_step_status(step.status),
                Cell::new(format!("{}ms", step.duration_ms)),
                Cell::new(step_summary(step)),
            ]);
        }

        println!();
        println!("{table}");
    }
    println!();
}

fn print_breakers(snapshots: &[CircuitSnapshot]) {
    if snapshots.is_empty() {
        println!("  No circuit breakers were used.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Resource").fg(Color::Cyan),
            Cell::new("State"),
            Cell::new("Failures"),
            Cell::new("Calls"),
            Cell::new("Rejected"),
            Cell::new("Last failure"),
        ]);

    for snap in snapshots {
        let last_failure = snap
            .last_failure_time
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&snap.resource),
            format_circuit_status(snap.state),
            Cell::new(snap.failure_count),
            Cell::new(snap.total_calls),
            Cell::new(snap.total_rejections),
            Cell::new(last_failure),
        ]);
    }

    println!("{table}");
    println!();
}

/// One-line summary of a step's output or error for the table.
fn step_summary(step: &StepResult) -> String {
    let text = match (&step.error, &step.result) {
        (Some(err), _) => err.clone(),
        (None, Some(value)) => value.to_string(),
        (None, None) => "-".to_string(),
    };
    truncate(&text, 60)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn format_step_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Success => Cell::new("success").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        StepStatus::Skipped => Cell::new("skipped").fg(Color::DarkYellow),
    }
}

fn format_circuit_status(status: CircuitStatus) -> Cell {
    match status {
        CircuitStatus::Closed => Cell::new("closed").fg(Color::Green),
        CircuitStatus::Open => Cell::new("open").fg(Color::Red),
        CircuitStatus::HalfOpen => Cell::new("half-open").fg(Color::Yellow),
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

    fn args() -> RunArgs {
        RunArgs {
            file: PathBuf::from("flow.json"),
            vars: Vec::new(),
            vars_file: None,
            workflow_id: None,
            execution_id: None,
            http_timeout: 30,
            breakers: false,
        }
    }

    #[test]
    fn test_parse_var_json_and_string_values() {
        assert_eq!(parse_var("limit=3").unwrap(), ("limit".to_string(), json!(3)));
        assert_eq!(
            parse_var("tags=[\"a\",\"b\"]").unwrap(),
            ("tags".to_string(), json!(["a", "b"]))
        );
        assert_eq!(
            parse_var("url=https://shop.test/?q=1").unwrap(),
            ("url".to_string(), json!("https://shop.test/?q=1"))
        );
        assert_eq!(parse_var("empty=").unwrap(), ("empty".to_string(), json!("")));
    }

    #[test]
    fn test_parse_var_rejects_malformed() {
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
    }

    #[test]
    fn test_cli_vars_override_vars_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, r#"{"target": "a", "limit": 1}"#).unwrap();

        let mut args = args();
        args.vars_file = Some(path);
        args.vars = vec![("limit".to_string(), json!(5))];

        let vars = collect_variables(&args).unwrap();
        assert_eq!(vars["target"], json!("a"));
        assert_eq!(vars["limit"], json!(5));
    }

    #[test]
    fn test_vars_file_must_be_object() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let mut args = args();
        args.vars_file = Some(path);
        assert!(collect_variables(&args).is_err());
    }

    #[test]
    fn test_progress_message_names_current_step() {
        let mut step = StepDefinition::new("open", StepType::Navigate, Value::Null);
        step.name = "Open shop".to_string();
        let definition = WorkflowDefinition::new(vec![step]);

        let mut ctx = ExecutionContext::new("wf", "e1", HashMap::new(), 1);
        assert_eq!(progress_message(&definition, &ctx), "[0/1] ");
        ctx.advance_to(1).unwrap();
        assert_eq!(progress_message(&definition, &ctx), "[1/1] Open shop");
    }

    #[test]
    fn test_step_summary_prefers_error_and_truncates() {
        let failed = StepResult::failed("s", "boom", 5);
        assert_eq!(step_summary(&failed), "boom");

        let long = StepResult::success("s", json!("x".repeat(100)), 5);
        let summary = step_summary(&long);
        assert_eq!(summary.chars().count(), 60);
        assert!(summary.ends_with("..."));
    }
}
