use std::path::{Path, PathBuf};
use std::sync::Arc;

use structopt::StructOpt;

use siem_pipeline::config::Config;
use siem_pipeline::{AlertStore, AlertWriter, SqliteStore};

/// SIEM pipeline command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "siem", about = "SIEM ingestion pipeline CLI")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Load a configuration file, apply environment overrides and print it
    Check {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Apply one alert message to the store through the writer's upsert path
    PersistAlert {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// File holding the raw alert message
        #[structopt(short, long)]
        file: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let config = if path.exists() {
        Config::from_file(path)?
    } else {
        eprintln!("Configuration file not found: {:?}, using defaults", path);
        Config::default()
    };
    Ok(config.apply_env()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::from_args();

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Check { config } => {
            let config = load_config(&config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Cli::PersistAlert { config, file } => {
            let config = load_config(&config)?;
            let payload = std::fs::read(&file)?;

            let store = Arc::new(SqliteStore::open(
                &config.store.path,
                config.store.write_timeout(),
            )?);
            let writer = AlertWriter::new(store.clone(), config.store.write_timeout());
            let id = writer.persist(&payload).await?;

            match store.get_alert(&id)? {
                Some(row) => println!(
                    "Alert {} tenant={} severity={} status={} title={:?}",
                    row.id, row.tenant_id, row.severity, row.status, row.title
                ),
                None => println!("Alert {} written", id),
            }
        }
    }

    Ok(())
}
