//! `stackflow validate`: check a workflow file without running it.

use std::path::Path;

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

/// Parse and validate `file`, then print its step list.
pub fn handle_validate(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let def = super::load_definition(file)?;

    if json {
        let steps: Vec<_> = def
            .steps
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "name": s.name,
                    "type": s.step_type,
                    "retryCount": s.retry_count,
                })
            })
            .collect();
        let out = serde_json::json!({
            "valid": true,
            "name": def.name,
            "steps": steps,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if quiet {
        return Ok(());
    }

    let title = def
        .name
        .clone()
        .unwrap_or_else(|| super::workflow_id_for(file));

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("*").green().bold(),
        style(&title).cyan()
    );
    if let Some(description) = &def.description {
        println!("  {}", style(description).dim());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Name"),
            Cell::new("Type"),
            Cell::new("Retries"),
        ]);

    for (i, step) in def.steps.iter().enumerate() {
        let retries = step
            .retry_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "default".to_string());
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&step.id),
            Cell::new(&step.name),
            Cell::new(step.step_type),
            Cell::new(retries),
        ]);
    }

    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
