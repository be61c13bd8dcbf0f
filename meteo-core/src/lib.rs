//! Core library for the `meteo` warehouse loader.
//!
//! This crate defines:
//! - Configuration handling (city list, weather endpoint, warehouse table)
//! - Service-account credentials and access-token exchange
//! - The fetch → normalize → batch → append pipeline and its trait seams
//! - An optional Telegram notifier for one distinguished city
//!
//! It is used by `meteo-cli`, but can also be reused by other binaries or
//! services (a scheduler, for instance).

pub mod auth;
pub mod config;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod sink;
pub mod source;

pub use auth::{ServiceAccountKey, ServiceAccountToken, TokenSource};
pub use config::{CityConfig, Config, NotifyConfig, WarehouseConfig, WeatherApiConfig};
pub use model::{Batch, Observation, WeatherRecord};
pub use notify::Notifier;
pub use pipeline::{CityOutcome, RunReport, run_pipeline};
pub use sink::{SinkMode, SinkReport, WarehouseSink, sink_from_mode};
pub use source::{WeatherSource, openmeteo::OpenMeteoSource};
