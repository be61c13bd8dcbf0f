use tracing::{error, info, warn};

use crate::{
    config::Config,
    model::Batch,
    normalize,
    notify::Notifier,
    sink::{SinkError, SinkReport, WarehouseSink},
    source::WeatherSource,
};

/// Outcome for one configured city.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CityOutcome {
    Loaded { city: String },
    Skipped { city: String, reason: String },
}

impl CityOutcome {
    pub fn city(&self) -> &str {
        match self {
            CityOutcome::Loaded { city } | CityOutcome::Skipped { city, .. } => city,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, CityOutcome::Loaded { .. })
    }
}

/// What a single run did: one outcome per configured city, in configured
/// order, plus the sink report when the warehouse step ran.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<CityOutcome>,
    pub sink: Option<SinkReport>,
}

impl RunReport {
    pub fn loaded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_loaded()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.len() - self.loaded_count()
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.loaded_count() == 0
    }
}

/// Fetch every configured city, normalize the responses into a batch, and
/// append the batch to the warehouse.
///
/// A fetch failure skips that city and is recorded in the report; it never
/// aborts the run. When no city produced a record the sink is not invoked and
/// the report comes back with `sink: None`. Sink transport and job failures
/// propagate; per-row rejections are part of a successful [`SinkReport`].
pub async fn run_pipeline(
    config: &Config,
    source: &dyn WeatherSource,
    sink: &dyn WarehouseSink,
    notifier: &Notifier,
) -> Result<RunReport, SinkError> {
    let notify_city = config.notify_city();
    let mut batch = Batch::new();
    let mut outcomes = Vec::with_capacity(config.cities.len());

    for city in &config.cities {
        match source.fetch_current(city).await {
            Ok(observation) => {
                let record = normalize::normalize(&city.name, &observation);
                info!(
                    city = %record.city,
                    temperature = record.temperature,
                    code = record.weather_code,
                    condition = %record.weather_description,
                    "fetched current conditions"
                );

                if notify_city == Some(city.name.as_str()) {
                    notifier.send(&normalize::format_city_message(&record)).await;
                }

                batch.push(record);
                outcomes.push(CityOutcome::Loaded { city: city.name.clone() });
            }
            Err(err) => {
                warn!(city = %city.name, error = %err, "skipping city after fetch failure");
                outcomes.push(CityOutcome::Skipped {
                    city: city.name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if batch.is_empty() {
        warn!("no city produced a record; skipping the warehouse step");
        return Ok(RunReport { outcomes, sink: None });
    }

    let sink_report = match sink.append(&batch).await {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "warehouse append failed");
            return Err(err);
        }
    };

    if !sink_report.is_clean() {
        for row in &sink_report.row_errors {
            warn!(index = row.index, message = %row.message, "warehouse rejected a row");
        }
        notifier
            .send(&format!(
                "Weather load: warehouse rejected {} of {} rows",
                sink_report.row_errors.len(),
                batch.len(),
            ))
            .await;
    }

    info!(
        appended = sink_report.appended,
        loaded = outcomes.iter().filter(|o| o.is_loaded()).count(),
        skipped = outcomes.iter().filter(|o| !o.is_loaded()).count(),
        "pipeline run finished"
    );

    Ok(RunReport { outcomes, sink: Some(sink_report) })
}
