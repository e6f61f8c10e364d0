//! # config — Environment Configuration
//!
//! Everything process-wide comes from the environment (`.env` is loaded by
//! `main`). Values that the dashboard may change at runtime (schedule
//! and initial capital) only get their defaults here; see [`crate::settings`].

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;

use crate::engine::WeekCalendar;
use crate::policy::{env_parse, DEFAULT_INITIAL_CAPITAL};

pub const DEFAULT_SCREENER_URL: &str = "https://finviz.com/screener.ashx?v=141&f=cap_midover,fa_eps5years_pos,fa_estltgrowth_pos,fa_netmargin_pos,fa_opermargin_pos,fa_pe_u30,fa_roe_pos,geo_usa,sh_avgvol_o100,sh_curvol_o100,ta_sma200_pa&ft=4&o=-perf4w";
pub const DEFAULT_PRICE_FEED_URL: &str = "https://query1.finance.yahoo.com";

/// Weekly fire time of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSpec {
    pub day:  Weekday,
    pub time: NaiveTime,
    pub tz:   Tz,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            day:  Weekday::Mon,
            time: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
            tz:   chrono_tz::Europe::Rome,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr:         SocketAddr,
    pub screener_url:      String,
    pub price_feed_url:    String,
    /// Per-request timeout for both collaborators.
    pub http_timeout:      Duration,
    /// `None` → in-memory store.
    pub database_url:      Option<String>,
    /// `None` → dev mode, writes are not gated.
    pub api_key:           Option<String>,
    /// Weekly gate for cycle snapshots.
    pub calendar:          WeekCalendar,
    pub schedule:          ScheduleSpec,
    pub scheduler_enabled: bool,
    pub initial_capital:   f64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = env_or("BIND_ADDR", "0.0.0.0:3000")
            .parse()
            .context("BIND_ADDR must be host:port")?;

        let timeout_secs: u64 = env_or("HTTP_TIMEOUT_SECS", "10")
            .parse()
            .context("HTTP_TIMEOUT_SECS must be a number")?;

        let calendar = WeekCalendar::new(
            parse_timezone(&env_or("SNAPSHOT_TIMEZONE", "Europe/Rome"))?,
            parse_weekday(&env_or("SNAPSHOT_CUTOFF_DAY", "mon"))?,
            parse_hhmm(&env_or("SNAPSHOT_CUTOFF_TIME", "18:00"))?,
        );

        let schedule = ScheduleSpec {
            day:  parse_weekday(&env_or("SCHEDULER_DAY", "mon"))?,
            time: parse_hhmm(&env_or("SCHEDULER_TIME", "19:00"))?,
            tz:   parse_timezone(&env_or("SCHEDULER_TIMEZONE", "Europe/Rome"))?,
        };

        Ok(Self {
            bind_addr,
            screener_url:      env_or("SCREENER_URL", DEFAULT_SCREENER_URL),
            price_feed_url:    env_or("PRICE_FEED_URL", DEFAULT_PRICE_FEED_URL),
            http_timeout:      Duration::from_secs(timeout_secs),
            database_url:      non_empty_env("DATABASE_URL"),
            api_key:           non_empty_env("API_KEY"),
            calendar,
            schedule,
            scheduler_enabled: env_parse("SCHEDULER_ENABLED", true),
            initial_capital:   env_parse("INITIAL_CAPITAL", DEFAULT_INITIAL_CAPITAL),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ─── Parsers (shared with settings validation) ───────────────────────────────

/// `mon`..`sun`, case-insensitive.
pub fn parse_weekday(value: &str) -> anyhow::Result<Weekday> {
    Ok(match value.trim().to_ascii_lowercase().as_str() {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        other => bail!("Unknown weekday '{other}'. Use mon..sun"),
    })
}

pub fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Strict `HH:MM`, 24-hour.
pub fn parse_hhmm(value: &str) -> anyhow::Result<NaiveTime> {
    let value = value.trim();
    if value.len() != 5 || value.as_bytes()[2] != b':' {
        bail!("Time '{value}' must be HH:MM");
    }
    NaiveTime::parse_from_str(value, "%H:%M").with_context(|| format!("Time '{value}' is not a valid HH:MM"))
}

pub fn parse_timezone(value: &str) -> anyhow::Result<Tz> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Unknown timezone '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schedule_values() {
        assert_eq!(parse_weekday("Wed").unwrap(), Weekday::Wed);
        assert!(parse_weekday("monday").is_err());
        assert_eq!(parse_hhmm("07:30").unwrap(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert!(parse_hhmm("7:30").is_err());
        assert!(parse_hhmm("25:00").is_err());
        assert_eq!(parse_timezone("America/New_York").unwrap(), chrono_tz::America::New_York);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn weekday_codes_round_trip() {
        for code in ["mon", "tue", "wed", "thu", "fri", "sat", "sun"] {
            assert_eq!(weekday_code(parse_weekday(code).unwrap()), code);
        }
    }
}
