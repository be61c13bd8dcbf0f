use crate::{config::CityConfig, model::Observation};
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub mod openmeteo;

/// Failure modes of a single current-conditions fetch.
///
/// The pipeline treats every variant the same way: log, skip the city,
/// continue with the next one.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to send request to the weather API: {0}")]
    Request(#[source] reqwest::Error),

    #[error("failed to read weather API response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("weather API request failed with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode weather API response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    /// Fetch current conditions for one configured city. One outbound call.
    async fn fetch_current(&self, city: &CityConfig) -> Result<Observation, SourceError>;
}
