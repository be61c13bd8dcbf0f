use chrono::{DateTime, Utc};
use serde::Serialize;

/// Raw current-condition fields as returned by the weather API for one city,
/// plus the instant the fetch completed.
///
/// `observed_at` is the API-reported observation time, kept verbatim for
/// logging; the warehouse row carries `fetched_at` as its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub temperature: f64,
    pub wind_speed: Option<f64>,
    pub weather_code: u16,
    pub observed_at: String,
    pub fetched_at: DateTime<Utc>,
}

/// One flat warehouse row. Immutable once constructed; lives only inside the
/// per-run [`Batch`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    pub city: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    pub weather_code: u16,
    pub weather_description: String,
    pub timestamp: DateTime<Utc>,
}

impl WeatherRecord {
    /// Project the record into the JSON object shape the warehouse expects.
    pub fn to_row(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Ordered, append-only accumulator for one pipeline run.
///
/// Records keep the iteration order of the configured city list; there is no
/// deduplication and no reordering.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    records: Vec<WeatherRecord>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: WeatherRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[WeatherRecord] {
        &self.records
    }

    /// Row objects for the insertAll payload, in batch order.
    pub fn to_rows(&self) -> Result<Vec<serde_json::Value>, serde_json::Error> {
        self.records.iter().map(WeatherRecord::to_row).collect()
    }

    /// Newline-delimited JSON for the bulk-load payload, in batch order.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
