//! Pure reshaping of raw current-condition fields into [`WeatherRecord`]s.
//!
//! No I/O happens here; the fetch instant is captured by the source adapter
//! and carried in on the [`Observation`].

use crate::model::{Observation, WeatherRecord};

/// Sentinel description for WMO codes outside the lookup table.
pub const UNKNOWN_CONDITION: &str = "unknown";

/// Human-readable description for a WMO weather condition code.
///
/// Codes outside the table map to [`UNKNOWN_CONDITION`], never an error.
pub fn weather_description(code: u16) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 => "fog",
        48 => "depositing rime fog",
        51 => "light drizzle",
        53 => "moderate drizzle",
        55 => "dense drizzle",
        56 => "light freezing drizzle",
        57 => "dense freezing drizzle",
        61 => "slight rain",
        63 => "moderate rain",
        65 => "heavy rain",
        66 => "light freezing rain",
        67 => "heavy freezing rain",
        71 => "light snow",
        73 => "moderate snow",
        75 => "heavy snow",
        77 => "snow grains",
        80 => "slight rain showers",
        81 => "moderate rain showers",
        82 => "violent rain showers",
        85 => "slight snow showers",
        86 => "heavy snow showers",
        95 => "thunderstorm",
        96 => "thunderstorm with slight hail",
        99 => "thunderstorm with heavy hail",
        _ => UNKNOWN_CONDITION,
    }
}

/// Build the flat warehouse record for one city from its raw observation.
pub fn normalize(city: &str, observation: &Observation) -> WeatherRecord {
    WeatherRecord {
        city: city.to_string(),
        temperature: observation.temperature,
        wind_speed: observation.wind_speed,
        weather_code: observation.weather_code,
        weather_description: weather_description(observation.weather_code).to_string(),
        timestamp: observation.fetched_at,
    }
}

/// One-line summary used for the notification message.
pub fn format_city_message(record: &WeatherRecord) -> String {
    match record.wind_speed {
        Some(wind) => format!(
            "{}: {:.1}°C, {}, wind {:.1} km/h",
            record.city, record.temperature, record.weather_description, wind
        ),
        None => format!(
            "{}: {:.1}°C, {}",
            record.city, record.temperature, record.weather_description
        ),
    }
}
