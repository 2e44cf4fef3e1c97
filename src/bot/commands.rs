//! Command parsing and replies.
//!
//! Input is trimmed and upper-cased before matching, so `wx4 2026-03-09` and
//! `WX4 2026-03-09` are the same command. Malformed WX4/WX5 arguments become a
//! usage hint; they are never reported as faults.
use chrono::{NaiveDate, NaiveTime};
use log::{error, info};
use std::sync::Arc;

use super::weather::{Location, WeatherProvider};
use crate::config::Config;
use crate::errors::CommandError;
use crate::meshtastic::SignalMetrics;

pub const HELP_MENU: &str =
    "--Help Menu--\nDM me the following:\nWeather\n(Other features will be added later)";
pub const STATUS_OK: &str = "Node is healthy.";
pub const WX_MENU: &str = "-WX Menu-\nReply (eg. WX1, WX2)\nWX1-5dayforecast\nWX2-HRLYforecast\nWX3-GenForecast\nWX4-CustomFC\nWX5-HrlyCustom";
pub const WEATHER_ERROR: &str = "Error processing weather request.";
pub const WEATHER_DISABLED: &str = "Weather service is disabled";
pub const UNKNOWN_COMMAND: &str = "Unknown command. DM 'help' for options.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    WeatherMenu,
    /// WX1
    Daily,
    /// WX2
    Hourly,
    /// WX3
    Current,
    /// WX4 YYYY-MM-DD
    ForDate(Result<NaiveDate, CommandError>),
    /// WX5 HH:MM
    ForHour(Result<NaiveTime, CommandError>),
    Other,
}

pub fn parse(input: &str) -> Command {
    let msg = input.trim().to_uppercase();
    match msg.as_str() {
        "HELP" | "/HELP" => return Command::Help,
        "/STATUS" => return Command::Status,
        "WEATHER" => return Command::WeatherMenu,
        "WX1" => return Command::Daily,
        "WX2" => return Command::Hourly,
        "WX3" => return Command::Current,
        _ => {}
    }
    if let Some(rest) = msg.strip_prefix("WX4") {
        return Command::ForDate(parse_date(rest.trim()));
    }
    if let Some(rest) = msg.strip_prefix("WX5") {
        return Command::ForHour(parse_time(rest.trim()));
    }
    Command::Other
}

fn parse_date(arg: &str) -> Result<NaiveDate, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingDate);
    }
    NaiveDate::parse_from_str(arg, "%Y-%m-%d").map_err(|_| CommandError::InvalidDate(arg.into()))
}

fn parse_time(arg: &str) -> Result<NaiveTime, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingTime);
    }
    NaiveTime::parse_from_str(arg, "%H:%M").map_err(|_| CommandError::InvalidTime(arg.into()))
}

/// Reply used for unrecognised input when the signal test is on.
pub fn signal_report(signal: &SignalMetrics) -> String {
    let snr = signal
        .snr
        .map(|v| format!("{:?}", v))
        .unwrap_or_else(|| "N/A".to_string());
    let rssi = signal
        .rssi
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    format!("RXxed!\nSNR is {}\nRSSI is {}", snr, rssi)
}

/// Turns commands into reply text.
pub struct CommandProcessor {
    weather: Option<Arc<dyn WeatherProvider>>,
    fallback: Location,
    use_node_gps: bool,
    signal_test: bool,
}

impl CommandProcessor {
    pub fn new(
        weather: Option<Arc<dyn WeatherProvider>>,
        fallback: Location,
        use_node_gps: bool,
        signal_test: bool,
    ) -> Self {
        Self {
            weather,
            fallback,
            use_node_gps,
            signal_test,
        }
    }

    pub fn from_config(config: &Config, weather: Option<Arc<dyn WeatherProvider>>) -> Self {
        let weather = weather.filter(|_| config.weather.enabled);
        Self::new(
            weather,
            Location::new(config.weather.latitude, config.weather.longitude),
            config.features.use_node_gps,
            config.features.signal_test,
        )
    }

    /// Location used for a sender whose last known position is `sender_position`.
    pub fn location_for(&self, sender_position: Option<(f64, f64)>) -> Location {
        match sender_position {
            Some((lat, lon)) if self.use_node_gps => {
                info!("Using sender GPS: {:.4}, {:.4}", lat, lon);
                Location::new(lat, lon)
            }
            _ => self.fallback,
        }
    }

    /// Reply text for `text`.
    pub async fn respond(
        &self,
        text: &str,
        signal: &SignalMetrics,
        sender_position: Option<(f64, f64)>,
    ) -> String {
        let cmd = parse(text);
        match cmd {
            Command::Help => HELP_MENU.to_string(),
            Command::Status => STATUS_OK.to_string(),
            Command::WeatherMenu => WX_MENU.to_string(),
            Command::Other if self.signal_test => signal_report(signal),
            Command::Other => UNKNOWN_COMMAND.to_string(),
            wx => self.weather_reply(wx, sender_position).await,
        }
    }

    async fn weather_reply(&self, cmd: Command, sender_position: Option<(f64, f64)>) -> String {
        // Argument errors are answered without touching the provider
        match &cmd {
            Command::ForDate(Err(e)) | Command::ForHour(Err(e)) => return e.hint().to_string(),
            _ => {}
        }
        let Some(weather) = self.weather.as_ref() else {
            return WEATHER_DISABLED.to_string();
        };
        let at = self.location_for(sender_position);
        let result = match cmd {
            Command::Daily => weather.daily_summary(at).await,
            Command::Hourly => weather.hourly_summary(at).await,
            Command::Current => weather.current_conditions(at).await,
            Command::ForDate(Ok(date)) => weather
                .for_date(at, date)
                .await
                .map(|r| r.unwrap_or_else(|| CommandError::MissingDate.hint().to_string())),
            Command::ForHour(Ok(time)) => weather
                .for_hour(at, time)
                .await
                .map(|r| r.unwrap_or_else(|| CommandError::MissingTime.hint().to_string())),
            _ => return UNKNOWN_COMMAND.to_string(),
        };
        result.unwrap_or_else(|e| {
            error!("Error processing WX command: {}", e);
            WEATHER_ERROR.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_errors_survive_a_clone() {
        let cmd = parse("wx5 25:99");
        assert!(matches!(cmd, Command::ForHour(Err(CommandError::InvalidTime(_)))));
        assert_eq!(cmd.clone(), cmd);
    }

    #[test]
    fn parse_is_case_and_space_insensitive() {
        assert_eq!(parse("  help "), Command::Help);
        assert_eq!(parse("/Help"), Command::Help);
        assert_eq!(parse("/status"), Command::Status);
        assert_eq!(parse("Weather"), Command::WeatherMenu);
        assert_eq!(parse("wx1"), Command::Daily);
        assert_eq!(parse("WX3\n"), Command::Current);
        assert_eq!(parse("status"), Command::Other);
        assert_eq!(parse("WX9"), Command::Other);
    }

    #[test]
    fn wx4_arguments() {
        assert_eq!(
            parse("wx4 2026-03-09"),
            Command::ForDate(Ok(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()))
        );
        assert_eq!(parse("wx4"), Command::ForDate(Err(CommandError::MissingDate)));
        assert_eq!(
            parse("WX4 tomorrow"),
            Command::ForDate(Err(CommandError::InvalidDate("TOMORROW".into())))
        );
    }

    #[test]
    fn wx5_arguments() {
        assert_eq!(
            parse("wx5 14:00"),
            Command::ForHour(Ok(NaiveTime::from_hms_opt(14, 0, 0).unwrap()))
        );
        assert_eq!(parse("WX5"), Command::ForHour(Err(CommandError::MissingTime)));
        assert!(matches!(parse("WX5 25:99"), Command::ForHour(Err(CommandError::InvalidTime(_)))));
    }

    #[test]
    fn signal_report_marks_missing_values() {
        let s = signal_report(&SignalMetrics {
            snr: Some(6.25),
            rssi: None,
        });
        assert_eq!(s, "RXxed!\nSNR is 6.25\nRSSI is N/A");
    }

    #[tokio::test]
    async fn static_replies_and_unknown() {
        let p = CommandProcessor::new(None, Location::new(0.0, 0.0), true, false);
        let sig = SignalMetrics::default();
        assert_eq!(p.respond("help", &sig, None).await, HELP_MENU);
        assert_eq!(p.respond("/STATUS", &sig, None).await, STATUS_OK);
        assert_eq!(p.respond("weather", &sig, None).await, WX_MENU);
        assert_eq!(p.respond("ping", &sig, None).await, UNKNOWN_COMMAND);
        assert_eq!(p.respond("wx1", &sig, None).await, WEATHER_DISABLED);
        // Argument hints do not need a provider
        assert!(p.respond("wx4", &sig, None).await.contains("Format- WX4 YYYY-MM-DD"));
    }

    #[test]
    fn gps_toggle_selects_location() {
        let fallback = Location::new(40.7128, -74.0060);
        let on = CommandProcessor::new(None, fallback, true, true);
        assert_eq!(on.location_for(Some((51.5, -0.12))), Location::new(51.5, -0.12));
        assert_eq!(on.location_for(None), fallback);
        let off = CommandProcessor::new(None, fallback, false, true);
        assert_eq!(off.location_for(Some((51.5, -0.12))), fallback);
    }
}
