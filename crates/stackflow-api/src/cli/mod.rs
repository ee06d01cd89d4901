//! CLI command definitions for the `stackflow` binary.
//!
//! Uses clap derive macros for argument parsing. Every command accepts the
//! global `--json`, `--quiet` and `-v` flags.

pub mod config;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;

use stackflow_core::workflow::definition::{load_workflow_file, WorkflowError};
use stackflow_infra::config::{load_engine_config, load_engine_config_file, resolve_data_dir, CONFIG_FILE_NAME};
use stackflow_types::config::EngineConfig;
use stackflow_types::workflow::WorkflowDefinition;

/// Run automation workflows with retries and circuit breakers.
#[derive(Parser)]
#[command(name = "stackflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Engine config file (defaults to `<data dir>/config.toml`).
    #[arg(long, global = true, env = "STACKFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition file.
    Run(run::RunArgs),

    /// Parse and validate a workflow definition file without running it.
    Validate {
        /// Path to the workflow file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// Show the effective engine configuration.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Path of the config file the engine reads: the `--config` override or the
/// default location inside the data directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => resolve_data_dir().join(CONFIG_FILE_NAME),
    }
}

/// Load the engine configuration, falling back to defaults.
pub async fn load_config(explicit: Option<&Path>) -> EngineConfig {
    match explicit {
        Some(path) => load_engine_config_file(path).await,
        None => load_engine_config(&resolve_data_dir()).await,
    }
}

/// Load and validate a workflow file, mapping errors to user-facing messages.
pub fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow::anyhow!("Failed to parse workflow: {msg}"),
        WorkflowError::ValidationError(msg) => anyhow::anyhow!("Workflow validation failed: {msg}"),
        WorkflowError::IoError(err) => {
            anyhow::anyhow!("Failed to read '{}': {err}", file.display())
        }
        other => anyhow::anyhow!("Failed to load workflow: {other}"),
    })
}

/// Default workflow ID for a file: its stem, e.g. `checkout` for `checkout.yaml`.
pub fn workflow_id_for(file: &Path) -> String {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from([
            "stackflow",
            "run",
            "flow.yaml",
            "--var",
            "limit=3",
            "--json",
            "-vv",
        ])
        .unwrap();

        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.file, PathBuf::from("flow.yaml"));
                assert_eq!(args.vars.len(), 1);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_config_path_prefers_explicit() {
        assert_eq!(
            config_path(Some(Path::new("/etc/stackflow.toml"))),
            PathBuf::from("/etc/stackflow.toml")
        );
        assert!(config_path(None).ends_with(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_workflow_id_from_file_stem() {
        assert_eq!(workflow_id_for(Path::new("flows/checkout.yaml")), "checkout");
        assert_eq!(workflow_id_for(Path::new("/")), "workflow");
    }

    #[test]
    fn test_load_definition_reports_validation_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"steps": []}"#).unwrap();

        let err = load_definition(&path).unwrap_err();
        assert!(err.to_string().starts_with("Workflow validation failed"));
    }
}
