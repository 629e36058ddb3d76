//! `tabforge run` drives the three-stage pipeline over one CSV.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabforge_agent::{AuditLog, Pipeline};
use tabforge_config::AppConfig;
use tabforge_core::provider::Provider;
use tabforge_providers::OpenAiCompatProvider;

/// Build the configured provider.
fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let provider: OpenAiCompatProvider = match config.provider.as_str() {
        "openai" => OpenAiCompatProvider::openai(api_key)?,
        "openrouter" => OpenAiCompatProvider::openrouter(api_key)?,
        "ollama" => OpenAiCompatProvider::ollama(config.api_url.as_deref())?,
        "custom" => {
            let url = config
                .api_url
                .as_deref()
                .ok_or("provider 'custom' requires api_url")?;
            OpenAiCompatProvider::new("custom", url, api_key)?
        }
        other => return Err(format!("Unknown provider '{other}'").into()),
    };
    Ok(Arc::new(provider))
}

pub async fn run(
    input: &Path,
    config_path: &Path,
    output_dir: Option<PathBuf>,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = model {
        config.model = model;
    }
    if let Some(dir) = output_dir {
        config.pipeline.data_dir = dir;
    }

    // Ollama runs without a key; everything else needs one.
    if !config.has_api_key() && config.provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    TABFORGE_API_KEY");
        eprintln!("    OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add api_key to: {}", config_path.display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = build_provider(&config)?;
    let audit = AuditLog::open(config.pipeline.data_dir.join("audit_log.jsonl"));

    println!("tabforge pipeline");
    println!("  input:    {}", input.display());
    println!("  provider: {} ({})", config.provider, config.model);
    println!("  data dir: {}", config.pipeline.data_dir.display());
    println!();

    let pipeline = Pipeline::new(provider, &config, audit);
    let report = pipeline.run(input).await?;

    println!();
    println!("{}", report.summary_text());
    println!();
    println!(
        "Full report: {}",
        config.pipeline.data_dir.join("final_report.md").display()
    );

    Ok(())
}
