//! # policy — Rotation Product Constants
//!
//! The rank bands, the cooldown window and the re-entry rank floor are product
//! decisions, not derived from any formula. They live here under their own
//! names; [`RotationPolicy::from_env`] allows the tunable ones to be
//! overridden per deployment.
//!
//! | Constant                | Value | Meaning                                   |
//! |-------------------------|-------|-------------------------------------------|
//! | `TAKE_PROFIT_MAX_RANK`  | 3     | ranks 1–3 are sold with reason `top_3`    |
//! | `CORE_RANKS`            | 4–13  | the only band new positions are bought in |
//! | `BUFFER_RANKS`          | 14–15 | held passively, outside slot accounting   |
//! | `UNIVERSE_DEPTH`        | 15    | below this rank a holding is dropped      |
//! | `DEFAULT_TARGET_SIZE`   | 12    | counted positions the engine aims for     |
//! | `TOP3_COOLDOWN_DAYS`    | 14    | wait after a `top_3` sale                 |
//! | `REENTRY_MIN_RANK`      | 9     | rank a `top_3` sale must fall to          |

use std::ops::RangeInclusive;

use chrono::Duration;

pub const TAKE_PROFIT_MAX_RANK: u32 = 3;
pub const CORE_RANKS: RangeInclusive<u32> = 4..=13;
pub const BUFFER_RANKS: RangeInclusive<u32> = 14..=15;
pub const UNIVERSE_DEPTH: u32 = 15;

pub const DEFAULT_TARGET_SIZE: usize = 12;
pub const TOP3_COOLDOWN_DAYS: i64 = 14;
pub const REENTRY_MIN_RANK: u32 = 9;

/// Trailing window for momentum, in calendar days.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
/// Capital deployed on the very first cycle.
pub const DEFAULT_INITIAL_CAPITAL: f64 = 150_000.0;

/// Tunable part of the rotation rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPolicy {
    /// Counted (non-buffer) positions the engine fills up to.
    pub target_size:        usize,
    /// Wait imposed by a `top_3` sale.
    pub top3_cooldown_days: i64,
    /// Minimum rank (numerically) a `top_3` sale must have fallen to.
    pub reentry_min_rank:   u32,
    pub lookback_days:      i64,
}

impl RotationPolicy {
    pub fn from_env() -> Self {
        Self {
            target_size:        env_parse("ROTATION_TARGET_SIZE", DEFAULT_TARGET_SIZE),
            top3_cooldown_days: env_parse("COOLDOWN_TOP3_DAYS", TOP3_COOLDOWN_DAYS),
            reentry_min_rank:   env_parse("REENTRY_MIN_RANK", REENTRY_MIN_RANK),
            lookback_days:      env_parse("MOMENTUM_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS),
        }
    }

    pub fn top3_cooldown(&self) -> Duration {
        Duration::days(self.top3_cooldown_days)
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            target_size:        DEFAULT_TARGET_SIZE,
            top3_cooldown_days: TOP3_COOLDOWN_DAYS,
            reentry_min_rank:   REENTRY_MIN_RANK,
            lookback_days:      DEFAULT_LOOKBACK_DAYS,
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
