use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    config::{CityConfig, WeatherApiConfig},
    model::Observation,
};

use super::{SourceError, WeatherSource};

/// Open-Meteo forecast endpoint; no API key required.
pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone)]
pub struct OpenMeteoSource {
    http: Client,
    base_url: String,
    timezone: String,
}

impl OpenMeteoSource {
    pub fn new(config: &WeatherApiConfig) -> Self {
        Self::with_base_url(config.base_url.clone(), config.timezone.clone())
    }

    pub fn with_base_url(base_url: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            timezone: timezone.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    #[serde(default)]
    windspeed: Option<f64>,
    weathercode: u16,
    time: String,
}

#[async_trait]
impl WeatherSource for OpenMeteoSource {
    async fn fetch_current(&self, city: &CityConfig) -> Result<Observation, SourceError> {
        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", city.latitude.to_string()),
                ("longitude", city.longitude.to_string()),
                ("current_weather", "true".to_string()),
                ("timezone", self.timezone.clone()),
            ])
            .send()
            .await
            .map_err(SourceError::Request)?;

        let status = res.status();
        let body = res.text().await.map_err(SourceError::Body)?;

        if !status.is_success() {
            return Err(SourceError::Status {
                status,
                body: truncate_body(&body),
            });
        }

        let parsed: ForecastResponse =
            serde_json::from_str(&body).map_err(SourceError::Decode)?;
        let current = parsed.current_weather;

        debug!(
            city = %city.name,
            observed_at = %current.time,
            "fetched current conditions"
        );

        // Record timestamp is the fetch instant; the API observation time is
        // only carried for logging.
        Ok(Observation {
            temperature: current.temperature,
            wind_speed: current.windspeed,
            weather_code: current.weathercode,
            observed_at: current.time,
            fetched_at: Utc::now(),
        })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn moscow() -> CityConfig {
        CityConfig {
            name: "Moscow".to_string(),
            latitude: 55.7522,
            longitude: 37.6156,
        }
    }

    fn source_for(server: &MockServer) -> OpenMeteoSource {
        OpenMeteoSource::with_base_url(
            format!("{}/v1/forecast", server.uri()),
            "Europe/Moscow",
        )
    }

    #[tokio::test]
    async fn fetch_extracts_current_condition_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", "55.7522"))
            .and(query_param("longitude", "37.6156"))
            .and(query_param("current_weather", "true"))
            .and(query_param("timezone", "Europe/Moscow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latitude": 55.75,
                "longitude": 37.62,
                "current_weather": {
                    "temperature": -5.2,
                    "windspeed": 12.4,
                    "weathercode": 71,
                    "time": "2024-01-01T00:00"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let observation = source_for(&server)
            .fetch_current(&moscow())
            .await
            .expect("fetch should succeed");

        assert_eq!(observation.temperature, -5.2);
        assert_eq!(observation.wind_speed, Some(12.4));
        assert_eq!(observation.weather_code, 71);
        assert_eq!(observation.observed_at, "2024-01-01T00:00");
    }

    #[tokio::test]
    async fn fetch_tolerates_missing_windspeed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current_weather": {
                    "temperature": -5.2,
                    "weathercode": 71,
                    "time": "2024-01-01T00:00:00Z"
                }
            })))
            .mount(&server)
            .await;

        let observation = source_for(&server)
            .fetch_current(&moscow())
            .await
            .expect("fetch should succeed");

        assert_eq!(observation.wind_speed, None);
    }

    #[tokio::test]
    async fn non_success_status_is_a_typed_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_current(&moscow())
            .await
            .unwrap_err();

        match err {
            SourceError::Status { status, body } => {
                assert_eq!(status.as_u16(), 500);
                assert!(body.contains("upstream exploded"));
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_fields_are_a_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"current_weather": {"temperature": 1.0}})),
            )
            .mount(&server)
            .await;

        let err = source_for(&server)
            .fetch_current(&moscow())
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn truncate_body_caps_long_output() {
        let long = "x".repeat(500);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), 203);

        // Multibyte input must not split a character.
        let cyrillic = "п".repeat(500);
        let truncated = truncate_body(&cyrillic);
        assert!(truncated.ends_with("..."));
    }
}
