//! `tabforge init` writes a starter config file.

use std::path::Path;
use tabforge_config::AppConfig;

pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        println!("Config already exists at: {}", path.display());
        println!("Edit it manually or delete and re-run init.");
        return Ok(());
    }

    std::fs::write(path, AppConfig::default_toml())?;
    println!("Created config at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set your API key (OPENAI_API_KEY or TABFORGE_API_KEY, or edit the file)");
    println!("  2. Run: tabforge run <dataset.csv>");

    Ok(())
}
