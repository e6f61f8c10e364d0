//! # scheduler — Weekly Trigger
//!
//! One background task. Each loop re-reads the effective schedule (the
//! dashboard may have changed it), sleeps until the next fire time and runs a
//! `Scheduled` cycle. Sleep is chunked so a schedule change is picked up
//! within [`RECHECK_INTERVAL`] instead of after a week.
//!
//! A configured fire time that lands before the snapshot cutoff of its week
//! is held back to the cutoff itself, so every scheduled run can pass the
//! weekly gate.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::{weekday_code, ScheduleSpec};
use crate::engine::guard::{localize, WeekCalendar};
use crate::orchestrator::{CycleOutcome, CycleTrigger, Orchestrator};

/// Longest single sleep before the schedule is re-read.
pub const RECHECK_INTERVAL: StdDuration = StdDuration::from_secs(300);

/// First fire time strictly after `now`, never earlier than the snapshot
/// cutoff of the week it falls in.
pub fn next_run_after(now: DateTime<Utc>, spec: &ScheduleSpec, calendar: &WeekCalendar) -> DateTime<Utc> {
    let local = now.with_timezone(&spec.tz);
    let ahead = (spec.day.num_days_from_monday() + 7 - local.weekday().num_days_from_monday()) % 7;
    let day   = local.date_naive() + Duration::days(ahead as i64);

    let fire_in = |weeks: i64| {
        let configured = localize(spec.tz, (day + Duration::days(7 * weeks)).and_time(spec.time));
        configured.max(calendar.cutoff_of_week(configured))
    };

    let this_week = fire_in(0);
    if this_week > now {
        this_week
    } else {
        fire_in(1)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub enabled:      bool,
    pub running:      bool,
    pub day:          String,
    pub time:         String,
    pub timezone:     String,
    pub next_run:     Option<DateTime<Utc>>,
    pub last_run:     Option<DateTime<Utc>>,
    /// `completed`, `skipped`, `refused` or `failed`.
    pub last_outcome: Option<String>,
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    enabled:      bool,
    status:       RwLock<SchedulerStatus>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, enabled: bool) -> Self {
        Self {
            orchestrator,
            enabled,
            status: RwLock::new(SchedulerStatus { enabled, ..SchedulerStatus::default() }),
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.running = self.orchestrator.is_running();
        status
    }

    /// Start the loop. A disabled scheduler returns without spawning.
    pub fn spawn(self: Arc<Self>) {
        if !self.enabled {
            info!("⏸️ Scheduler disabled — cycles run only on manual trigger");
            return;
        }
        tokio::spawn(async move { self.run().await });
    }

    async fn run(&self) {
        loop {
            let spec = match self.orchestrator.settings().await {
                Ok(settings) => settings.schedule,
                Err(err) => {
                    warn!(error = %err, "Could not read settings — using default schedule");
                    ScheduleSpec::default()
                }
            };

            let now = Utc::now();
            let next = next_run_after(now, &spec, self.orchestrator.calendar());
            {
                let mut status = self.status.write().await;
                status.day      = weekday_code(spec.day).to_string();
                status.time     = spec.time.format("%H:%M").to_string();
                status.timezone = spec.tz.name().to_string();
                status.next_run = Some(next);
            }

            let wait = (next - now).to_std().unwrap_or_default();
            if wait > RECHECK_INTERVAL {
                tokio::time::sleep(RECHECK_INTERVAL).await;
                continue;
            }

            info!(at = %next, "⏰ Next scheduled cycle");
            tokio::time::sleep(wait).await;

            let outcome = self.orchestrator.run_cycle(CycleTrigger::Scheduled).await;
            let label = match &outcome {
                CycleOutcome::Completed(_)   => "completed",
                CycleOutcome::Skipped { .. } => "skipped",
                CycleOutcome::Refused(_)     => "refused",
                CycleOutcome::Failed { .. }  => "failed",
            };
            if let CycleOutcome::Failed { reason } = &outcome {
                error!(reason = %reason, "Scheduled cycle failed");
            }

            let mut status = self.status.write().await;
            status.last_run     = Some(Utc::now());
            status.last_outcome = Some(label.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Weekday};

    fn spec(day: Weekday, h: u32, m: u32) -> ScheduleSpec {
        ScheduleSpec {
            day,
            time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            tz:   chrono_tz::Europe::Rome,
        }
    }

    #[test]
    fn later_same_day() {
        // Monday 2025-04-07 10:00 UTC = 12:00 Rome
        let now = Utc.with_ymd_and_hms(2025, 4, 7, 10, 0, 0).unwrap();
        let next = next_run_after(now, &spec(Weekday::Mon, 19, 0), &WeekCalendar::default());
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 4, 7, 17, 0, 0).unwrap());
    }

    #[test]
    fn passed_today_rolls_a_week() {
        let now = Utc.with_ymd_and_hms(2025, 4, 7, 17, 0, 0).unwrap();
        let next = next_run_after(now, &spec(Weekday::Mon, 19, 0), &WeekCalendar::default());
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 4, 14, 17, 0, 0).unwrap());
    }

    #[test]
    fn crosses_dst_change() {
        // Friday 2025-03-28, Rome switches to CEST on Sunday 30 March
        let now = Utc.with_ymd_and_hms(2025, 3, 28, 12, 0, 0).unwrap();
        let next = next_run_after(now, &spec(Weekday::Mon, 19, 0), &WeekCalendar::default());
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 31, 17, 0, 0).unwrap());

        // Same weekday one week earlier is still CET
        let earlier = Utc.with_ymd_and_hms(2025, 3, 21, 12, 0, 0).unwrap();
        assert_eq!(
            next_run_after(earlier, &spec(Weekday::Mon, 19, 0), &WeekCalendar::default()),
            Utc.with_ymd_and_hms(2025, 3, 24, 18, 0, 0).unwrap()
        );
    }

    #[test]
    fn other_timezone_and_day() {
        let ny = ScheduleSpec { tz: chrono_tz::America::New_York, ..spec(Weekday::Fri, 16, 30) };
        // Wednesday 2025-04-09 12:00 UTC
        let now = Utc.with_ymd_and_hms(2025, 4, 9, 12, 0, 0).unwrap();
        assert_eq!(next_run_after(now, &ny, &WeekCalendar::default()), Utc.with_ymd_and_hms(2025, 4, 11, 20, 30, 0).unwrap());
    }

    #[test]
    fn early_schedule_is_held_to_the_cutoff_every_week() {
        let calendar = WeekCalendar::default();
        let early = spec(Weekday::Mon, 9, 0);

        // Sunday 2025-04-06 12:00 UTC; the cutoff is Mon 18:00 Rome = 16:00 UTC
        let mut now = Utc.with_ymd_and_hms(2025, 4, 6, 12, 0, 0).unwrap();
        for week in 0..4 {
            let fire = next_run_after(now, &early, &calendar);
            assert_eq!(fire, Utc.with_ymd_and_hms(2025, 4, 7, 16, 0, 0).unwrap() + Duration::weeks(week));
            assert!(calendar.admit_cycle(fire, None).is_ok());
            now = fire + Duration::seconds(30);
        }
    }

    #[test]
    fn between_configured_time_and_cutoff_still_fires_this_week() {
        // Monday 2025-04-07 10:00 UTC: 09:00 Rome has passed, the cutoff has not
        let now = Utc.with_ymd_and_hms(2025, 4, 7, 10, 0, 0).unwrap();
        let fire = next_run_after(now, &spec(Weekday::Mon, 9, 0), &WeekCalendar::default());
        assert_eq!(fire, Utc.with_ymd_and_hms(2025, 4, 7, 16, 0, 0).unwrap());
    }

    #[test]
    fn timezone_shift_before_cutoff_is_held() {
        // Mon 08:00 New York = Mon 14:00 Rome, still before the Rome cutoff
        let ny = ScheduleSpec { tz: chrono_tz::America::New_York, ..spec(Weekday::Mon, 8, 0) };
        let now = Utc.with_ymd_and_hms(2025, 4, 9, 12, 0, 0).unwrap();
        assert_eq!(
            next_run_after(now, &ny, &WeekCalendar::default()),
            Utc.with_ymd_and_hms(2025, 4, 14, 16, 0, 0).unwrap()
        );
    }
}
