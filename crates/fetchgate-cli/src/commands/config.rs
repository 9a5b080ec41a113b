//! Config command handlers

use anyhow::Result;

use fetchgate_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config: &Config, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "base_url": config.base_url,
                    "events_url": config.events_url,
                    "refresh_path": config.refresh_path,
                    "request_timeout_ms": config.request_timeout_ms,
                    "grace_period_secs": config.grace_period_secs,
                    "max_age_secs": config.max_age_secs
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.base_url);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!("  base_url:           {}", config.base_url);
            println!(
                "  events_url:         {}",
                config.events_url.as_deref().unwrap_or("(not set)")
            );
            println!("  refresh_path:       {}", config.refresh_path);
            println!("  request_timeout_ms: {}", config.request_timeout_ms);
            println!("  grace_period_secs:  {}", config.grace_period_secs);
            println!("  max_age_secs:       {}", config.max_age_secs);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}
