//! `stackflow config`: show the effective engine configuration.

use std::path::Path;

use anyhow::Result;
use console::style;

pub async fn handle_config(explicit: Option<&Path>, json: bool) -> Result<()> {
    let path = super::config_path(explicit);
    let config = super::load_config(explicit).await;

    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = if path.exists() {
        style(path.display().to_string()).cyan()
    } else {
        style(format!("{} (not found, using defaults)", path.display())).dim()
    };

    println!();
    println!("  Config: {source}");
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    println!();

    Ok(())
}
