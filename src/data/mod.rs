//! Core data models for the weather client
//!
//! The two payload shapes served by the forecast API (a single current reading
//! and a time series), the resolved place coordinates, and the [`Payload`]
//! union the cache persists them under.

pub mod geocode;
pub mod weather;

pub use geocode::Geocoder;
pub use weather::{WeatherClient, WeatherError};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coordinates for a place name, resolved once and cached by [`Geocoder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: String,
}

/// Current conditions as returned by the forecast API
///
/// Field names on the wire follow Open-Meteo, both when decoding responses and
/// when the value is re-served by the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub latitude: f64,
    pub longitude: f64,
    pub current: CurrentConditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    #[serde(default)]
    pub time: String,
    /// Temperature in Celsius
    #[serde(rename = "temperature_2m")]
    pub temperature: f64,
    /// Relative humidity percentage (0-100)
    #[serde(rename = "relative_humidity_2m")]
    pub humidity: f64,
    /// Wind speed in km/h
    #[serde(rename = "windspeed_10m")]
    pub wind_speed: f64,
    /// Wind direction in degrees
    #[serde(rename = "winddirection_10m")]
    pub wind_direction: f64,
    /// Surface pressure in hPa
    #[serde(rename = "surface_pressure")]
    pub pressure: f64,
    /// WMO weather code
    #[serde(rename = "weathercode")]
    pub weather_code: i32,
}

/// Hourly forecast series as returned by the forecast API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub latitude: f64,
    pub longitude: f64,
    pub hourly: HourlySeries,
}

/// Parallel arrays, one element per hour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<String>,
    #[serde(rename = "temperature_2m")]
    pub temperature: Vec<f64>,
    #[serde(rename = "relative_humidity_2m")]
    pub humidity: Vec<f64>,
    #[serde(rename = "windspeed_10m")]
    pub wind_speed: Vec<f64>,
    #[serde(rename = "winddirection_10m")]
    pub wind_direction: Vec<f64>,
    #[serde(rename = "surface_pressure")]
    pub pressure: Vec<f64>,
    #[serde(rename = "weathercode")]
    pub weather_code: Vec<i32>,
}

/// One hour of an [`HourlySeries`]
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRow<'a> {
    pub time: &'a str,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub pressure: f64,
    pub weather_code: i32,
}

impl HourlyForecast {
    /// Number of complete hourly rows (the shortest of the parallel arrays)
    pub fn len(&self) -> usize {
        let h = &self.hourly;
        [
            h.time.len(),
            h.temperature.len(),
            h.humidity.len(),
            h.wind_speed.len(),
            h.wind_direction.len(),
            h.pressure.len(),
            h.weather_code.len(),
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates complete rows; trailing elements of longer arrays are ignored
    pub fn rows(&self) -> impl Iterator<Item = HourlyRow<'_>> {
        let h = &self.hourly;
        (0..self.len()).map(move |i| HourlyRow {
            time: &h.time[i],
            temperature: h.temperature[i],
            humidity: h.humidity[i],
            wind_speed: h.wind_speed[i],
            wind_direction: h.wind_direction[i],
            pressure: h.pressure[i],
            weather_code: h.weather_code[i],
        })
    }

    /// Returns a copy with every series cut to at most `hours` entries.
    ///
    /// `hours == 0` means "all hours" and returns the forecast unchanged.
    pub fn truncated(&self, hours: usize) -> HourlyForecast {
        let mut out = self.clone();
        if hours > 0 {
            let h = &mut out.hourly;
            h.time.truncate(hours);
            h.temperature.truncate(hours);
            h.humidity.truncate(hours);
            h.wind_speed.truncate(hours);
            h.wind_direction.truncate(hours);
            h.pressure.truncate(hours);
            h.weather_code.truncate(hours);
        }
        out
    }
}

/// The resource kinds cached per city
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Current,
    Hourly,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Current => "current",
            ResourceKind::Hourly => "hourly",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the cache key `"<city>_<kind>"`, e.g. `belgrade_current`.
///
/// The city part is trimmed and lowercased so `Belgrade` and `belgrade ` share
/// an entry.
pub fn cache_key(city: &str, kind: ResourceKind) -> String {
    format!("{}_{}", city.trim().to_lowercase(), kind)
}

/// Every value shape the forecast cache stores, tagged on disk by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Current(CurrentWeather),
    Hourly(HourlyForecast),
}

impl Payload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Payload::Current(_) => ResourceKind::Current,
            Payload::Hourly(_) => ResourceKind::Hourly,
        }
    }

    pub fn into_current(self) -> Option<CurrentWeather> {
        match self {
            Payload::Current(c) => Some(c),
            Payload::Hourly(_) => None,
        }
    }

    pub fn into_hourly(self) -> Option<HourlyForecast> {
        match self {
            Payload::Hourly(h) => Some(h),
            Payload::Current(_) => None,
        }
    }
}

impl From<CurrentWeather> for Payload {
    fn from(value: CurrentWeather) -> Self {
        Payload::Current(value)
    }
}

impl From<HourlyForecast> for Payload {
    fn from(value: HourlyForecast) -> Self {
        Payload::Hourly(value)
    }
}
