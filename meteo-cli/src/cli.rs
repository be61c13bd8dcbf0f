use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use meteo_core::{
    CityOutcome, Config, Notifier, OpenMeteoSource, ServiceAccountKey, ServiceAccountToken,
    TokenSource, WeatherSource, normalize, run_pipeline, sink_from_mode,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "meteo", version, about = "Weather-to-warehouse loader")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch all configured cities and append them to the warehouse table.
    Run {
        /// Path to the config file; defaults to the platform config directory.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured write strategy ("insert" or "load").
        #[arg(long)]
        mode: Option<String>,
    },

    /// Fetch one configured city and print the normalized record.
    Show {
        /// City name as listed in the config.
        city: String,

        /// Path to the config file; defaults to the platform config directory.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a starter config file to the platform config directory.
    Init,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Run { config, mode } => {
                run_command(config.as_deref(), mode.as_deref()).await
            }
            Command::Show { city, config } => show_command(&city, config.as_deref()).await,
            Command::Init => init_command(),
        }
    }
}

async fn run_command(
    config_path: Option<&Path>,
    mode_override: Option<&str>,
) -> anyhow::Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(mode) = mode_override {
        config.warehouse.mode = mode.to_string();
    }
    config.validate()?;

    // Credentials are resolved before any network call so a misconfigured
    // environment fails fast.
    let key = ServiceAccountKey::from_env()?;
    let token: Arc<dyn TokenSource> = Arc::new(ServiceAccountToken::new(key));

    let sink_mode = config.warehouse.sink_mode()?;
    let table = config.warehouse.table_ref();

    let source = OpenMeteoSource::new(&config.weather);
    let sink = sink_from_mode(sink_mode, table.clone(), token);
    let notifier = Notifier::from_env();

    info!(
        mode = %sink_mode,
        cities = config.cities.len(),
        table = %table,
        notifications = notifier.is_enabled(),
        "starting pipeline run"
    );

    let report = run_pipeline(&config, &source, sink.as_ref(), &notifier).await?;

    for outcome in &report.outcomes {
        match outcome {
            CityOutcome::Loaded { city } => println!("{city}: ok"),
            CityOutcome::Skipped { city, reason } => println!("{city}: skipped ({reason})"),
        }
    }

    if let Some(sink_report) = &report.sink {
        println!("Appended {} row(s) to {table}.", sink_report.appended);
        if !sink_report.is_clean() {
            println!("{} row(s) were rejected by the warehouse.", sink_report.row_errors.len());
        }
    }

    if report.all_failed() {
        anyhow::bail!("Fetch failed for every configured city; nothing was loaded.");
    }

    Ok(())
}

async fn show_command(city_name: &str, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;

    let city = config
        .city(city_name)
        .with_context(|| format!("City '{city_name}' is not in the configured city list."))?;

    let source = OpenMeteoSource::new(&config.weather);
    let observation = source.fetch_current(city).await?;
    let record = normalize::normalize(&city.name, &observation);

    println!("{}", normalize::format_city_message(&record));
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}

fn init_command() -> anyhow::Result<()> {
    let path = Config::config_file_path()?;
    if path.exists() {
        anyhow::bail!("Config file already exists: {}", path.display());
    }

    let written = Config::default().save()?;
    println!("Wrote starter config to {}.", written.display());
    println!("Set `project` under [warehouse] before the first run.");

    Ok(())
}
