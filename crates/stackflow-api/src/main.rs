//! StackFlow CLI entry point.
//!
//! Binary name: `stackflow`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handler. Exits with status 2 when a run does not complete.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use stackflow_observe::tracing_setup::{init_tracing, shutdown_tracing, LogFormat};

/// Exit status for a run that ended `failed` or `partial`.
const EXIT_INCOMPLETE: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stackflow_core=debug,stackflow_infra=debug",
        _ => "trace",
    };
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(filter, format, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let config = cli.config.as_deref();
    let outcome = match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "stackflow", &mut std::io::stdout());
            Ok(true)
        }
        Commands::Validate { ref file } => {
            cli::validate::handle_validate(file, cli.json, cli.quiet).map(|()| true)
        }
        Commands::Config => cli::config::handle_config(config, cli.json).await.map(|()| true),
        Commands::Run(args) => cli::run::handle_run(args, config, cli.json, cli.quiet)
            .await
            .map(|result| result.is_completed()),
    };

    shutdown_tracing();

    if !outcome? {
        std::process::exit(EXIT_INCOMPLETE);
    }
    Ok(())
}
