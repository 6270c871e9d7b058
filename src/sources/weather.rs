// OpenWeatherMap source
//
// Fetches the current weather for one configured location and publishes
// the readings as `weather_*{location="..."}` gauges. The API is metered,
// so every call goes through a daily call quota.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{MeteredClient, ScrapeError, ScrapeSource};
use crate::apiclient::ApiClient;
use crate::config::WeatherConfig;
use crate::exposition::MetricsBackend;
use crate::registry::MetricsRegistry;

/// Gauges published per location
const GAUGES: [(&str, &str); 13] = [
    ("temp", "Current temperature."),
    ("temp_feels_like", "Perceived temperature."),
    ("temp_min", "Minimum temperature currently observed."),
    ("temp_max", "Maximum temperature currently observed."),
    ("air_pressure", "Atmospheric pressure. hPa."),
    ("humidity", "Relative humidity. Percent."),
    ("rain_level", "Rain volume over the last hour. mm."),
    ("snow_level", "Snow volume over the last hour. mm."),
    ("wind_speed", "Wind speed."),
    ("wind_gust", "Wind gust speed."),
    ("wind_direction", "Wind direction. Degrees."),
    ("visibility", "Visibility. Metres."),
    ("cloud_cover", "Cloud cover. Percent."),
];

/// Current-weather response. Only the fields that are published are kept;
/// absent sections (no rain, no snow) default to zero.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WeatherReport {
    pub name: String,
    pub main: MainReadings,
    pub visibility: f64,
    pub wind: Wind,
    pub clouds: Clouds,
    pub rain: Precipitation,
    pub snow: Precipitation,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MainReadings {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Wind {
    pub speed: f64,
    pub deg: f64,
    pub gust: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Clouds {
    pub all: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Precipitation {
    #[serde(rename = "1h")]
    pub last_hour: f64,
}

impl WeatherReport {
    /// Gauge name/value pairs in the order of [`GAUGES`]
    fn readings(&self) -> [(&'static str, f64); 13] {
        [
            ("temp", self.main.temp),
            ("temp_feels_like", self.main.feels_like),
            ("temp_min", self.main.temp_min),
            ("temp_max", self.main.temp_max),
            ("air_pressure", self.main.pressure),
            ("humidity", self.main.humidity),
            ("rain_level", self.rain.last_hour),
            ("snow_level", self.snow.last_hour),
            ("wind_speed", self.wind.speed),
            ("wind_gust", self.wind.gust),
            ("wind_direction", self.wind.deg),
            ("visibility", self.visibility),
            ("cloud_cover", self.clouds.all),
        ]
    }
}

/// Weather scrape source for one location
pub struct WeatherSource {
    url: String,
    location: String,
    interval: Duration,
    api: MeteredClient,
    metrics: MetricsRegistry,
}

impl WeatherSource {
    pub fn new(config: &WeatherConfig, backend: &MetricsBackend, client: Arc<dyn ApiClient>) -> Self {
        WeatherSource {
            url: config.url(),
            location: config.location.clone(),
            interval: Duration::from_secs(config.interval),
            api: MeteredClient::new(backend, "openweathermap", client, Some(config.limit)),
            metrics: MetricsRegistry::new(backend.clone(), "weather", Some("location")),
        }
    }
}

#[async_trait]
impl ScrapeSource for WeatherSource {
    fn name(&self) -> &str {
        "openweathermap"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn setup(&mut self) -> Result<(), ScrapeError> {
        let set = self.metrics.get(&self.location);
        for (name, help) in GAUGES {
            set.declare(name, help);
        }
        Ok(())
    }

    async fn scrape(&mut self) -> Result<(), ScrapeError> {
        let report: WeatherReport = self.api.get_json(&self.url, "current weather").await?;

        debug!(
            "Weather for {} ({}): {:.1} degrees, {}% humidity",
            self.location, report.name, report.main.temp, report.main.humidity
        );

        let set = self.metrics.get(&self.location);
        for (name, value) in report.readings() {
            set.set(name, value);
        }

        Ok(())
    }
}
