//! # settings — Runtime Settings
//!
//! Key/value pairs the dashboard may change without a restart. Only
//! whitelisted keys are accepted and each value is validated before anything
//! is written; one bad entry rejects the whole batch.
//!
//! | Key                  | Accepted values                                   |
//! |----------------------|---------------------------------------------------|
//! | `scheduler_day`      | `mon` … `sun`                                     |
//! | `scheduler_time`     | `HH:MM`                                           |
//! | `scheduler_timezone` | Europe/Rome, America/New_York, America/Los_Angeles, Asia/Tokyo, UTC |
//! | `initial_value`      | number, 1 000 … 10 000 000                        |
//! | `notify_rebalance`   | `true` / `false`                                  |
//! | `notify_changes`     | `true` / `false`                                  |

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::{parse_hhmm, parse_timezone, parse_weekday, weekday_code, ScheduleSpec};

pub const SCHEDULER_DAY: &str = "scheduler_day";
pub const SCHEDULER_TIME: &str = "scheduler_time";
pub const SCHEDULER_TIMEZONE: &str = "scheduler_timezone";
pub const INITIAL_VALUE: &str = "initial_value";
pub const NOTIFY_REBALANCE: &str = "notify_rebalance";
pub const NOTIFY_CHANGES: &str = "notify_changes";

pub const KNOWN_KEYS: [&str; 6] = [
    SCHEDULER_DAY,
    SCHEDULER_TIME,
    SCHEDULER_TIMEZONE,
    INITIAL_VALUE,
    NOTIFY_REBALANCE,
    NOTIFY_CHANGES,
];

const ALLOWED_TIMEZONES: [&str; 5] = [
    "Europe/Rome",
    "America/New_York",
    "America/Los_Angeles",
    "Asia/Tokyo",
    "UTC",
];

const INITIAL_VALUE_RANGE: (f64, f64) = (1_000.0, 10_000_000.0);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("Unknown setting '{0}'")]
    UnknownKey(String),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

fn invalid(key: &str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid { key: key.to_string(), reason: reason.into() }
}

/// JSON scalar → stored string form.
fn as_setting_string(key: &str, value: &Value) -> Result<String, SettingsError> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b)   => Ok(b.to_string()),
        _ => Err(invalid(key, "must be a string, number or boolean")),
    }
}

/// Validate one key/value pair.
pub fn validate(key: &str, value: &str) -> Result<(), SettingsError> {
    match key {
        SCHEDULER_DAY => parse_weekday(value).map(|_| ()).map_err(|e| invalid(key, e.to_string())),
        SCHEDULER_TIME => parse_hhmm(value).map(|_| ()).map_err(|e| invalid(key, e.to_string())),
        SCHEDULER_TIMEZONE => {
            if ALLOWED_TIMEZONES.contains(&value) {
                Ok(())
            } else {
                Err(invalid(key, format!("must be one of {}", ALLOWED_TIMEZONES.join(", "))))
            }
        }
        INITIAL_VALUE => {
            let amount: f64 = value.parse().map_err(|_| invalid(key, "must be a number"))?;
            let (min, max) = INITIAL_VALUE_RANGE;
            if amount.is_finite() && (min..=max).contains(&amount) {
                Ok(())
            } else {
                Err(invalid(key, format!("must be between {min} and {max}")))
            }
        }
        NOTIFY_REBALANCE | NOTIFY_CHANGES => match value {
            "true" | "false" => Ok(()),
            _ => Err(invalid(key, "must be 'true' or 'false'")),
        },
        other => Err(SettingsError::UnknownKey(other.to_string())),
    }
}

/// Validate a whole update. Returns the normalised string values, or the
/// first error.
pub fn validate_batch(values: &BTreeMap<String, Value>) -> Result<BTreeMap<String, String>, SettingsError> {
    let mut out = BTreeMap::new();
    for (key, raw) in values {
        let value = as_setting_string(key, raw)?;
        validate(key, &value)?;
        out.insert(key.clone(), value);
    }
    Ok(out)
}

// ─── Effective Settings ───────────────────────────────────────────────────────

/// Stored overrides layered over the environment defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSettings {
    pub scheduler_day:      String,
    pub scheduler_time:     String,
    pub scheduler_timezone: String,
    pub initial_value:      f64,
    pub notify_rebalance:   bool,
    pub notify_changes:     bool,
    #[serde(skip)]
    pub schedule:           ScheduleSpec,
}

impl EffectiveSettings {
    /// A stored value that no longer parses (e.g. written by an older build)
    /// is ignored with a warning and the default applies.
    pub fn resolve(defaults: &ScheduleSpec, initial_capital: f64, stored: &BTreeMap<String, String>) -> Self {
        let mut schedule = defaults.clone();
        let mut initial_value = initial_capital;

        if let Some(v) = usable(stored, SCHEDULER_DAY) {
            if let Ok(day) = parse_weekday(v) {
                schedule.day = day;
            }
        }
        if let Some(v) = usable(stored, SCHEDULER_TIME) {
            if let Ok(time) = parse_hhmm(v) {
                schedule.time = time;
            }
        }
        if let Some(v) = usable(stored, SCHEDULER_TIMEZONE) {
            if let Ok(tz) = parse_timezone(v) {
                schedule.tz = tz;
            }
        }
        if let Some(v) = usable(stored, INITIAL_VALUE) {
            if let Ok(amount) = v.parse() {
                initial_value = amount;
            }
        }

        Self {
            scheduler_day:      weekday_code(schedule.day).to_string(),
            scheduler_time:     schedule.time.format("%H:%M").to_string(),
            scheduler_timezone: schedule.tz.name().to_string(),
            initial_value,
            notify_rebalance:   usable(stored, NOTIFY_REBALANCE).map_or(true, |v| v == "true"),
            notify_changes:     usable(stored, NOTIFY_CHANGES).map_or(true, |v| v == "true"),
            schedule,
        }
    }
}

fn usable<'a>(stored: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    let value = stored.get(key)?;
    match validate(key, value) {
        Ok(()) => Some(value.as_str()),
        Err(err) => {
            warn!(key, %err, "Ignoring stored setting");
            None
        }
    }
}
