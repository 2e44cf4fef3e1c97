//! Weather collaborator used by the WX commands and the alert poller.
//!
//! [`WeatherProvider`] is the seam; [`OpenMeteoWeather`] (feature `weather`) fetches
//! forecasts from Open-Meteo and active alerts from the NWS API. Formatting lives in
//! plain functions over [`Forecast`] so it can be tested without the network.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Deserialize;

use super::alerts::AlertRecord;

/// Where a forecast is requested for, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Five-day high/low summary.
    async fn daily_summary(&self, at: Location) -> Result<String>;
    /// Next five hours.
    async fn hourly_summary(&self, at: Location) -> Result<String>;
    async fn current_conditions(&self, at: Location) -> Result<String>;
    /// `None` when the forecast has no entry for `date`.
    async fn for_date(&self, at: Location, date: NaiveDate) -> Result<Option<String>>;
    /// `None` when today's forecast has no entry for `time`.
    async fn for_hour(&self, at: Location, time: NaiveTime) -> Result<Option<String>>;
    async fn active_alerts(&self, at: Location) -> Result<Vec<AlertRecord>>;
}

/// Open-Meteo forecast response (only the fields used here).
#[derive(Debug, Clone, Deserialize)]
pub struct Forecast {
    pub current_weather: Option<CurrentWeather>,
    pub hourly: Hourly,
    pub daily: Daily,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub windspeed: f64,
    pub winddirection: f64,
    pub weathercode: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hourly {
    pub time: Vec<String>,
    pub temperature_2m: Vec<f64>,
    pub weathercode: Vec<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Daily {
    pub time: Vec<String>,
    pub temperature_2m_max: Vec<f64>,
    pub temperature_2m_min: Vec<f64>,
    pub weathercode: Vec<i32>,
}

/// Short condition label for a WMO weather code.
pub fn wmo_condition(code: i32) -> &'static str {
    match code {
        0 => "Clear",
        1 => "M.Clear",
        2 => "P.Cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        61 | 63 | 65 => "Rain",
        71 | 73 | 75 => "Snow",
        80..=82 => "Showers",
        95 => "T-Storm",
        _ => "Cloudy",
    }
}

/// 16-point compass direction for a bearing in degrees.
pub fn cardinal(degrees: f64) -> &'static str {
    const DIRS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let ix = ((degrees.rem_euclid(360.0) + 11.25) / 22.5) as usize;
    DIRS[ix % 16]
}

fn unit_label(celsius: bool) -> &'static str {
    if celsius {
        "C"
    } else {
        "F"
    }
}

pub fn format_daily(f: &Forecast, celsius: bool) -> String {
    let u = unit_label(celsius);
    let d = &f.daily;
    let days = d
        .time
        .len()
        .min(d.temperature_2m_max.len())
        .min(d.temperature_2m_min.len())
        .min(d.weathercode.len())
        .min(5);
    (0..days)
        .map(|i| {
            let name = NaiveDate::parse_from_str(&d.time[i], "%Y-%m-%d")
                .map(|dt| dt.format("%a").to_string().to_uppercase())
                .unwrap_or_else(|_| d.time[i].clone());
            format!(
                "{}:{}/{}{} {}",
                name,
                d.temperature_2m_max[i] as i64,
                d.temperature_2m_min[i] as i64,
                u,
                wmo_condition(d.weathercode[i])
            )
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn hourly_entries(h: &Hourly) -> impl Iterator<Item = (NaiveDateTime, f64, i32)> + '_ {
    h.time
        .iter()
        .zip(h.temperature_2m.iter())
        .zip(h.weathercode.iter())
        .filter_map(|((t, temp), code)| {
            NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M")
                .ok()
                .map(|ts| (ts, *temp, *code))
        })
}

/// The first five hourly entries at or after the start of `now`'s hour.
pub fn format_hourly(f: &Forecast, celsius: bool, now: NaiveDateTime) -> String {
    let u = unit_label(celsius);
    let hour_start = now.date().and_hms_opt(now.hour(), 0, 0).unwrap_or(now);
    hourly_entries(&f.hourly)
        .filter(|(ts, _, _)| *ts >= hour_start)
        .take(5)
        .map(|(ts, temp, code)| {
            format!("{} {}{} {}", ts.format("%H:%M"), temp as i64, u, wmo_condition(code))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn format_current(f: &Forecast, celsius: bool) -> String {
    let Some(c) = &f.current_weather else {
        return "Current weather data missing.".to_string();
    };
    let u = unit_label(celsius);
    let wind_unit = if celsius { "kmh" } else { "mph" };
    let mut out = format!(
        "Currently: {}{}, {}. Wind: {} {}{}.",
        c.temperature as i64,
        u,
        wmo_condition(c.weathercode),
        cardinal(c.winddirection),
        c.windspeed as i64,
        wind_unit
    );
    if let Some(hi) = f.daily.temperature_2m_max.first() {
        out.push_str(&format!(" Today's High: {}{}.", *hi as i64, u));
    }
    out
}

pub fn format_for_date(f: &Forecast, celsius: bool, date: NaiveDate) -> Option<String> {
    let key = date.format("%Y-%m-%d").to_string();
    let d = &f.daily;
    let idx = d.time.iter().position(|t| *t == key)?;
    let hi = *d.temperature_2m_max.get(idx)? as i64;
    let lo = *d.temperature_2m_min.get(idx)? as i64;
    let cond = wmo_condition(*d.weathercode.get(idx)?);
    let u = unit_label(celsius);
    Some(format!(
        "Forecast for {}: Expect {} conditions. The high will be around {}{} with a low of {}{}.",
        date.format("%A, %b %d"),
        cond,
        hi,
        u,
        lo,
        u
    ))
}

pub fn format_for_hour(
    f: &Forecast,
    celsius: bool,
    today: NaiveDate,
    time: NaiveTime,
) -> Option<String> {
    let want = today.and_time(time);
    let (_, temp, code) = hourly_entries(&f.hourly).find(|(ts, _, _)| *ts == want)?;
    Some(format!(
        "Hour Forecast for {}: Expect {} conditions. The temperature will be around {}{}.",
        time.format("%H:%M"),
        wmo_condition(code),
        temp as i64,
        unit_label(celsius)
    ))
}

#[cfg(feature = "weather")]
pub use client::OpenMeteoWeather;

#[cfg(feature = "weather")]
mod client {
    use super::*;
    use anyhow::anyhow;
    use log::{debug, error};
    use std::time::Duration;

    use crate::config::WeatherConfig;

    const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
    const ALERTS_URL: &str = "https://api.weather.gov/alerts/active";
    const USER_AGENT: &str = "MeshUpGrade (meshtastic-alert-system)";

    #[derive(Debug, Deserialize)]
    struct AlertFeed {
        #[serde(default)]
        features: Vec<AlertFeature>,
    }

    #[derive(Debug, Deserialize)]
    struct AlertFeature {
        #[serde(default)]
        properties: AlertProperties,
    }

    #[derive(Debug, Default, Deserialize)]
    struct AlertProperties {
        id: Option<String>,
        event: Option<String>,
        headline: Option<String>,
        severity: Option<String>,
    }

    /// Open-Meteo forecasts plus NWS alerts.
    pub struct OpenMeteoWeather {
        client: reqwest::Client,
        celsius: bool,
        timeout: Duration,
    }

    impl OpenMeteoWeather {
        pub fn new(config: &WeatherConfig) -> Self {
            Self {
                client: reqwest::Client::new(),
                celsius: config.is_celsius(),
                timeout: Duration::from_secs(config.timeout_seconds.max(1)),
            }
        }

        async fn fetch(&self, at: Location) -> Result<Forecast> {
            let (temp_unit, wind_unit) = if self.celsius {
                ("celsius", "kmh")
            } else {
                ("fahrenheit", "mph")
            };
            let lat = at.latitude.to_string();
            let lon = at.longitude.to_string();
            let query = [
                ("latitude", lat.as_str()),
                ("longitude", lon.as_str()),
                ("hourly", "temperature_2m,weathercode"),
                ("daily", "temperature_2m_max,temperature_2m_min,weathercode"),
                ("current_weather", "true"),
                ("temperature_unit", temp_unit),
                ("windspeed_unit", wind_unit),
                ("timezone", "auto"),
            ];
            debug!("Fetching forecast for {:.4},{:.4}", at.latitude, at.longitude);
            let resp = self
                .client
                .get(FORECAST_URL)
                .query(&query)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| {
                    error!("Weather API error: {}", e);
                    anyhow!("weather request failed: {}", e)
                })?;
            if !resp.status().is_success() {
                return Err(anyhow!("weather API returned {}", resp.status()));
            }
            Ok(resp.json::<Forecast>().await?)
        }
    }

    #[async_trait]
    impl WeatherProvider for OpenMeteoWeather {
        async fn daily_summary(&self, at: Location) -> Result<String> {
            Ok(format_daily(&self.fetch(at).await?, self.celsius))
        }

        async fn hourly_summary(&self, at: Location) -> Result<String> {
            let now = chrono::Local::now().naive_local();
            Ok(format_hourly(&self.fetch(at).await?, self.celsius, now))
        }

        async fn current_conditions(&self, at: Location) -> Result<String> {
            Ok(format_current(&self.fetch(at).await?, self.celsius))
        }

        async fn for_date(&self, at: Location, date: NaiveDate) -> Result<Option<String>> {
            Ok(format_for_date(&self.fetch(at).await?, self.celsius, date))
        }

        async fn for_hour(&self, at: Location, time: NaiveTime) -> Result<Option<String>> {
            let today = chrono::Local::now().date_naive();
            Ok(format_for_hour(&self.fetch(at).await?, self.celsius, today, time))
        }

        async fn active_alerts(&self, at: Location) -> Result<Vec<AlertRecord>> {
            let url = format!("{}?point={:.4},{:.4}", ALERTS_URL, at.latitude, at.longitude);
            let resp = self
                .client
                .get(&url)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| anyhow!("NWS alert request failed: {}", e))?;
            let feed: AlertFeed = resp.json().await?;
            Ok(feed
                .features
                .into_iter()
                .filter_map(|f| {
                    let p = f.properties;
                    Some(AlertRecord {
                        id: p.id?,
                        event: p.event.unwrap_or_default(),
                        headline: p.headline.unwrap_or_default(),
                        severity: p.severity.unwrap_or_default(),
                    })
                })
                .collect())
        }
    }
}
