//! Terminal rendering for the two forecast shapes
//!
//! Everything here returns a `String`; the binary decides where it goes.
//! Columns are padded before colouring so escape codes never skew alignment.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use colored::{ColoredString, Colorize};

use crate::config::{ColorMode, TimeZoneMode};
use crate::data::{CurrentWeather, HourlyForecast, ResourceKind};
use crate::log::Logger;
use crate::log_warn;

const RULE: &str = "─";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Palette {
    Dark,
    Light,
    Plain,
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Heading,
    Muted,
    Temperature,
    Humidity,
    Wind,
    Pressure,
    Condition,
    Warning,
}

/// Colour palette plus the emoji toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    palette: Palette,
    pub emoji: bool,
}

impl Theme {
    pub fn new(color: ColorMode, emoji: bool) -> Self {
        let palette = match color {
            ColorMode::Dark => Palette::Dark,
            ColorMode::Light => Palette::Light,
            ColorMode::None => Palette::Plain,
            ColorMode::Auto if supports_color() => Palette::Dark,
            ColorMode::Auto => Palette::Plain,
        };
        Self { palette, emoji }
    }

    /// No colour at all
    pub fn plain(emoji: bool) -> Self {
        Self {
            palette: Palette::Plain,
            emoji,
        }
    }

    pub fn is_colored(&self) -> bool {
        self.palette != Palette::Plain
    }

    fn paint(&self, text: &str, role: Role) -> String {
        if self.palette == Palette::Plain {
            return text.to_string();
        }
        let painted: ColoredString = match role {
            Role::Heading => text.bold(),
            Role::Muted if self.palette == Palette::Light => text.white(),
            Role::Muted => text.bright_black(),
            Role::Temperature => text.cyan(),
            Role::Humidity => text.blue(),
            Role::Wind => text.yellow(),
            Role::Pressure => text.green(),
            Role::Condition => text.green(),
            Role::Warning => text.red().bold(),
        };
        painted.to_string()
    }
}

/// `colored`'s own decision: `NO_COLOR`, `CLICOLOR`, `CLICOLOR_FORCE`, a
/// terminal on stdout and any `colored::control::set_override`
fn supports_color() -> bool {
    colored::control::SHOULD_COLORIZE.should_colorize()
}

/// Describes a WMO weather code, e.g. `"🌤️ Partly cloudy"`
pub fn weather_description(code: i32, emoji: bool) -> String {
    let (icon, text) = match code {
        0 => ("☀️", "Clear sky"),
        1 | 2 => ("🌤️", "Partly cloudy"),
        3 => ("☁️", "Overcast"),
        45 | 48 => ("🌫️", "Fog"),
        51 | 53 | 55 => ("🌦️", "Drizzle"),
        56 | 57 => ("🌧️", "Freezing drizzle"),
        61 | 63 | 65 => ("🌧️", "Rain"),
        66 | 67 => ("🌧️", "Freezing rain"),
        71 | 73 | 75 => ("🌨️", "Snow"),
        77 => ("❄️", "Snow grains"),
        80..=82 => ("🌧️", "Rain showers"),
        85 | 86 => ("🌨️", "Snow showers"),
        95 => ("⛈️", "Thunderstorm"),
        96 | 99 => ("🌩️", "Thunderstorm with hail"),
        _ => ("🌈", "Unknown"),
    };
    if emoji {
        format!("{} {}", icon, text)
    } else {
        text.to_string()
    }
}

/// Maps a bearing in degrees to one of eight compass points
pub fn degrees_to_compass(degrees: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = ((degrees.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    POINTS[index]
}

/// Parses an API timestamp (`2024-07-15T14:00` or RFC 3339) as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn format_timestamp(at: DateTime<Utc>, zone: TimeZoneMode) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M";
    match zone {
        TimeZoneMode::Utc => at.format(FORMAT).to_string(),
        TimeZoneMode::Local => at.with_timezone(&Local).format(FORMAT).to_string(),
        TimeZoneMode::Named(tz) => at.with_timezone(&tz).format(FORMAT).to_string(),
    }
}

/// Renders current conditions as a parameter/value table
pub fn render_current(weather: &CurrentWeather, place: &str, theme: &Theme) -> String {
    let c = &weather.current;
    let rows = [
        ("Temperature", format!("{:.1} °C", c.temperature), Role::Temperature),
        ("Humidity", format!("{:.0} %", c.humidity), Role::Humidity),
        ("Wind speed", format!("{:.1} km/h", c.wind_speed), Role::Wind),
        ("Wind direction", degrees_to_compass(c.wind_direction).to_string(), Role::Wind),
        ("Pressure", format!("{:.0} hPa", c.pressure), Role::Pressure),
        ("Condition", weather_description(c.weather_code, theme.emoji), Role::Condition),
    ];

    let mut out = String::new();
    out.push_str(&theme.paint(&format!("Current weather: {}", place), Role::Heading));
    out.push('\n');
    out.push_str(&theme.paint(&format!("{:<20}{}", "Parameter", "Value"), Role::Heading));
    out.push('\n');
    out.push_str(&theme.paint(&RULE.repeat(36), Role::Muted));
    out.push('\n');
    for (label, value, role) in rows {
        out.push_str(&theme.paint(&format!("{:<20}", label), role));
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// Renders the hourly series as a table, limited to `hours` rows (0 = all).
///
/// Rows whose timestamp cannot be parsed are skipped with a warning.
pub fn render_hourly(
    forecast: &HourlyForecast,
    place: &str,
    hours: usize,
    zone: TimeZoneMode,
    theme: &Theme,
    logger: &dyn Logger,
) -> String {
    let zone_name = match zone {
        TimeZoneMode::Local => "Local",
        TimeZoneMode::Utc => "UTC",
        TimeZoneMode::Named(tz) => tz.name(),
    };
    let limit = if hours == 0 { forecast.len() } else { hours };

    let mut out = String::new();
    out.push_str(&theme.paint(&format!("Hourly forecast: {} ({})", place, zone_name), Role::Heading));
    out.push('\n');
    out.push_str(&theme.paint(
        &format!(
            "{:<18}{:>10}{:>13}{:>6}{:>14}{:>16}  {}",
            "Time", "Temp (°C)", "Wind (km/h)", "Dir", "Humidity (%)", "Pressure (hPa)", "Conditions"
        ),
        Role::Heading,
    ));
    out.push('\n');
    out.push_str(&theme.paint(&RULE.repeat(96), Role::Muted));
    out.push('\n');

    for row in forecast.rows().take(limit) {
        let Some(at) = parse_timestamp(row.time) else {
            log_warn!(logger, "Failed to parse time value={}", row.time);
            continue;
        };
        out.push_str(&theme.paint(&format!("{:<18}", format_timestamp(at, zone)), Role::Muted));
        out.push_str(&theme.paint(&format!("{:>10.1}", row.temperature), Role::Temperature));
        out.push_str(&theme.paint(&format!("{:>13.1}", row.wind_speed), Role::Wind));
        out.push_str(&theme.paint(&format!("{:>6}", degrees_to_compass(row.wind_direction)), Role::Wind));
        out.push_str(&theme.paint(&format!("{:>14.0}", row.humidity), Role::Humidity));
        out.push_str(&theme.paint(&format!("{:>16.0}", row.pressure), Role::Pressure));
        out.push_str("  ");
        out.push_str(&theme.paint(&weather_description(row.weather_code, theme.emoji), Role::Condition));
        out.push('\n');
    }
    out
}

/// The marker printed in place of a half that did not arrive
pub fn render_unavailable(kind: ResourceKind, theme: &Theme) -> String {
    let what = match kind {
        ResourceKind::Current => "Current weather",
        ResourceKind::Hourly => "Hourly forecast",
    };
    let prefix = if theme.emoji { "⚠️ " } else { "" };
    theme.paint(&format!("{}{} unavailable (timeout or error)", prefix, what), Role::Warning)
}
