use std::path::Path;

use clap::{Args, Subcommand};

use fitsync::config::Config;

use super::OutputFormat;

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a starter config file
    Init,
}

impl ConfigCommand {
    /// `target` is where `init` writes: the `--config` path or the default location.
    pub fn run(&self, config: &Config, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }
            ConfigSubcommand::Init => {
                Config::write_template(target)?;
                println!("Wrote {}", target.display());
                println!("Edit user_id and the remote section before running 'fitsync sync'.");
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    println!(
        "user_id: {}",
        config.user_id.value.as_deref().unwrap_or("(not set)")
    );
    println!("  source: {}", config.user_id.source);
    println!();

    println!("remote:");
    println!(
        "  server_url: {}",
        config.remote.server_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  api_key: {}",
        if config.remote.api_key.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("  timeout_secs: {}", config.remote.timeout_secs);
    println!();

    println!("sync:");
    println!("  max_retries: {}", config.sync.max_retries);
    println!("  base_delay_ms: {}", config.sync.base_delay_ms);
    println!("  max_delay_ms: {}", config.sync.max_delay_ms);
    println!("  batch_size: {}", config.sync.batch_size);
    match config.sync.max_parallel_tables {
        Some(n) => println!("  max_parallel_tables: {}", n),
        None => println!("  max_parallel_tables: unlimited"),
    }
}
