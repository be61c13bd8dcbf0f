use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use crate::sink::{SinkMode, TableRef};

/// One entry in the fetch list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CityConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Weather endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherApiConfig {
    pub base_url: String,
    pub timezone: String,
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            base_url: crate::source::openmeteo::DEFAULT_BASE_URL.to_string(),
            timezone: "Europe/Moscow".to_string(),
        }
    }
}

/// Destination table and write strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Cloud project that owns the dataset. Must be set before the first run.
    pub project: String,
    pub dataset: String,
    pub table: String,
    /// Write strategy, "insert" or "load".
    pub mode: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            dataset: "weather_data_raw".to_string(),
            table: "current_weather".to_string(),
            mode: SinkMode::Insert.as_str().to_string(),
        }
    }
}

impl WarehouseConfig {
    pub fn sink_mode(&self) -> Result<SinkMode> {
        SinkMode::try_from(self.mode.as_str())
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: self.table.clone(),
        }
    }
}

/// Chat notification settings. The named city must be part of the fetch list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyConfig {
    pub city: String,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [[cities]]
/// name = "Moscow"
/// latitude = 55.7522
/// longitude = 37.6156
///
/// [warehouse]
/// project = "my-project"
///
/// [notify]
/// city = "Moscow"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cities")]
    pub cities: Vec<CityConfig>,

    #[serde(default)]
    pub weather: WeatherApiConfig,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub notify: Option<NotifyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cities: default_cities(),
            weather: WeatherApiConfig::default(),
            warehouse: WarehouseConfig::default(),
            notify: None,
        }
    }
}

fn default_cities() -> Vec<CityConfig> {
    fn city(name: &str, latitude: f64, longitude: f64) -> CityConfig {
        CityConfig { name: name.to_string(), latitude, longitude }
    }

    vec![
        city("Moscow", 55.7522, 37.6156),
        city("Saint Petersburg", 59.9386, 30.3141),
        city("Novosibirsk", 55.0415, 82.9346),
        city("Yekaterinburg", 56.8519, 60.6122),
        city("Kazan", 55.7887, 49.1221),
    ]
}

impl Config {
    /// Load config from `path`, or from the platform config directory when
    /// `None`. A missing file at the platform path yields the built-in
    /// defaults; an explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::read_file(p),
            None => {
                let p = Self::config_file_path()?;
                if p.exists() { Self::read_file(&p) } else { Ok(Self::default()) }
            }
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(path)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "meteo", "meteo-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Cross-field checks that deserialization cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.cities.is_empty() {
            return Err(anyhow!("Config lists no cities to fetch."));
        }

        let mut seen = HashSet::new();
        for city in &self.cities {
            if city.name.trim().is_empty() {
                return Err(anyhow!("Config contains a city with an empty name."));
            }
            if !seen.insert(city.name.as_str()) {
                return Err(anyhow!("City '{}' is listed more than once.", city.name));
            }
        }

        if self.warehouse.project.trim().is_empty() {
            return Err(anyhow!(
                "Warehouse project is not set.\n\
                 Hint: set `project` under [warehouse] in the config file (run `meteo init` to create one)."
            ));
        }

        self.warehouse.sink_mode()?;

        if let Some(notify) = &self.notify {
            if !self.cities.iter().any(|c| c.name == notify.city) {
                return Err(anyhow!(
                    "Notify city '{}' is not in the configured city list.",
                    notify.city
                ));
            }
        }

        Ok(())
    }

    /// Look up a configured city by name, case-insensitively.
    pub fn city(&self, name: &str) -> Option<&CityConfig> {
        self.cities.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn notify_city(&self) -> Option<&str> {
        self.notify.as_ref().map(|n| n.city.as_str())
    }
}
