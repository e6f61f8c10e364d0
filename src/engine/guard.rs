//! # engine::guard — Weekly Snapshot Gate
//!
//! Rules a new snapshot must pass before the store accepts it:
//!
//! 1. **One per week**: weeks start Monday 00:00 in the configured timezone
//! 2. **Never over a locked week**: history is immutable
//! 3. **Not before the cutoff**, e.g. Monday 18:00 Europe/Rome, after the
//!    US open has settled; any later moment in the same week is fine
//!
//! Backdated imports skip the cutoff but must be strictly in the past and may
//! not land in a week that already has a snapshot.
//!
//! The gate is pure. The store calls it inside the same critical section as
//! the insert so check and write can never interleave with another cycle.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;

use crate::models::PortfolioSnapshot;

// ─── Refusals ─────────────────────────────────────────────────────────────────

/// Expected, typed "no" from the portfolio ledger. Never a 500.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyRefusal {
    #[error("Snapshot already exists for this week (ID: {id})")]
    AlreadyExists { id: i64 },

    #[error("This week's snapshot is locked (historical data, ID: {id})")]
    WeekLocked { id: i64 },

    #[error("New snapshots can only be created after {cutoff} (current time: {now})")]
    BeforeCutoff { cutoff: String, now: String },

    #[error("Snapshot {id} is locked and cannot be modified")]
    SnapshotLocked { id: i64 },

    #[error("Imported snapshot must be backdated ({timestamp} is not in the past)")]
    NotBackdated { timestamp: String },

    #[error("A rotation cycle is already in progress")]
    CycleInProgress,
}

/// Local wall-clock time in `tz` → UTC. In a DST gap the wall time is read
/// as UTC; in an overlap the earlier instant wins.
pub(crate) fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

// ─── Calendar ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct WeekCalendar {
    pub tz:             Tz,
    pub cutoff_weekday: Weekday,
    pub cutoff_time:    NaiveTime,
}

impl Default for WeekCalendar {
    fn default() -> Self {
        Self {
            tz:             chrono_tz::Europe::Rome,
            cutoff_weekday: Weekday::Mon,
            cutoff_time:    NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
        }
    }
}

impl WeekCalendar {
    pub fn new(tz: Tz, cutoff_weekday: Weekday, cutoff_time: NaiveTime) -> Self {
        Self { tz, cutoff_weekday, cutoff_time }
    }

    /// Local Monday of the week containing `at`.
    fn monday_of(&self, at: DateTime<Utc>) -> NaiveDate {
        let local = at.with_timezone(&self.tz);
        local.date_naive() - Duration::days(local.weekday().num_days_from_monday() as i64)
    }

    fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        localize(self.tz, naive)
    }

    /// `[Monday 00:00, next Monday 00:00)` around `at`, in UTC.
    pub fn week_window(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let monday = self.monday_of(at);
        let start  = self.localize(monday.and_time(NaiveTime::default()));
        let end    = self.localize((monday + Duration::days(7)).and_time(NaiveTime::default()));
        (start, end)
    }

    pub fn same_week(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.monday_of(a) == self.monday_of(b)
    }

    /// The cutoff moment of the week containing `at`.
    pub fn cutoff_of_week(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let day = self.monday_of(at) + Duration::days(self.cutoff_weekday.num_days_from_monday() as i64);
        self.localize(day.and_time(self.cutoff_time))
    }

    /// Human form, e.g. `Mon 18:00 Europe/Rome`.
    pub fn describe_cutoff(&self) -> String {
        format!("{} {} {}", self.cutoff_weekday, self.cutoff_time.format("%H:%M"), self.tz.name())
    }

    // ─── Gates ───────────────────────────────────────────────────────────────

    /// May a cycle snapshot be created at `now`, given the snapshot (if any)
    /// already sitting in the same week?
    pub fn admit_cycle(
        &self,
        now:      DateTime<Utc>,
        existing: Option<&PortfolioSnapshot>,
    ) -> Result<(), PolicyRefusal> {
        if let Some(snapshot) = existing {
            return Err(if snapshot.locked {
                PolicyRefusal::WeekLocked { id: snapshot.id }
            } else {
                PolicyRefusal::AlreadyExists { id: snapshot.id }
            });
        }

        if now < self.cutoff_of_week(now) {
            let local = now.with_timezone(&self.tz);
            return Err(PolicyRefusal::BeforeCutoff {
                cutoff: self.describe_cutoff(),
                now:    local.format("%a %H:%M").to_string(),
            });
        }

        Ok(())
    }

    /// May a historical snapshot stamped `timestamp` be imported at `now`?
    pub fn admit_import(
        &self,
        timestamp: DateTime<Utc>,
        now:       DateTime<Utc>,
        existing:  Option<&PortfolioSnapshot>,
    ) -> Result<(), PolicyRefusal> {
        if timestamp >= now {
            return Err(PolicyRefusal::NotBackdated { timestamp: timestamp.to_rfc3339() });
        }

        match existing {
            Some(s) if s.locked => Err(PolicyRefusal::WeekLocked { id: s.id }),
            Some(s) => Err(PolicyRefusal::AlreadyExists { id: s.id }),
            None => Ok(()),
        }
    }
}

/// Answer of the "can I run now?" probe shown on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotWindow {
    pub allowed:    bool,
    pub reason:     String,
    pub week_start: DateTime<Utc>,
    pub cutoff:     DateTime<Utc>,
}

impl SnapshotWindow {
    pub fn probe(calendar: &WeekCalendar, now: DateTime<Utc>, existing: Option<&PortfolioSnapshot>) -> Self {
        let (week_start, _) = calendar.week_window(now);
        let verdict = calendar.admit_cycle(now, existing);

        Self {
            allowed: verdict.is_ok(),
            reason:  match verdict {
                Ok(())   => "OK - Can create new weekly snapshot".to_string(),
                Err(why) => why.to_string(),
            },
            week_start,
            cutoff:  calendar.cutoff_of_week(now),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ZoneBasket;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn snapshot(id: i64, locked: bool) -> PortfolioSnapshot {
        PortfolioSnapshot {
            id,
            timestamp:   utc(2025, 4, 7, 17, 0),
            holdings:    Vec::new(),
            basket:      ZoneBasket::default(),
            cash:        0.0,
            total_value: 0.0,
            locked,
            notes:       None,
        }
    }

    // April 2025: Europe/Rome is UTC+2 → Monday 18:00 local = 16:00 UTC

    #[test]
    fn refuses_before_monday_cutoff() {
        let cal = WeekCalendar::default();
        let err = cal.admit_cycle(utc(2025, 4, 7, 15, 59), None).unwrap_err();
        assert!(matches!(err, PolicyRefusal::BeforeCutoff { .. }));
        assert!(err.to_string().contains("Mon 18:00 Europe/Rome"));
    }

    #[test]
    fn admits_at_and_after_cutoff() {
        let cal = WeekCalendar::default();
        assert!(cal.admit_cycle(utc(2025, 4, 7, 16, 0), None).is_ok());
        // Missed Monday → Wednesday still fine
        assert!(cal.admit_cycle(utc(2025, 4, 9, 8, 0), None).is_ok());
    }

    #[test]
    fn refuses_second_snapshot_in_week() {
        let cal = WeekCalendar::default();
        let now = utc(2025, 4, 8, 10, 0);

        assert_eq!(
            cal.admit_cycle(now, Some(&snapshot(7, false))),
            Err(PolicyRefusal::AlreadyExists { id: 7 })
        );
        assert_eq!(
            cal.admit_cycle(now, Some(&snapshot(7, true))),
            Err(PolicyRefusal::WeekLocked { id: 7 })
        );
    }

    #[test]
    fn week_boundary_follows_local_midnight() {
        let cal = WeekCalendar::default();
        // Sunday 23:30 Rome and Monday 00:30 Rome
        let sunday = utc(2025, 4, 6, 21, 30);
        let monday = utc(2025, 4, 6, 22, 30);
        assert!(!cal.same_week(sunday, monday));

        let (start, end) = cal.week_window(monday);
        assert_eq!(start, utc(2025, 4, 6, 22, 0));
        assert_eq!(end - start, Duration::days(7));
    }

    #[test]
    fn import_must_be_backdated_into_free_week() {
        let cal = WeekCalendar::default();
        let now = utc(2025, 4, 8, 10, 0);

        assert!(matches!(
            cal.admit_import(now + Duration::hours(1), now, None),
            Err(PolicyRefusal::NotBackdated { .. })
        ));
        assert!(cal.admit_import(now - Duration::days(30), now, None).is_ok());
        assert_eq!(
            cal.admit_import(now - Duration::days(30), now, Some(&snapshot(3, true))),
            Err(PolicyRefusal::WeekLocked { id: 3 })
        );
    }

    #[test]
    fn refusal_serializes_with_kind() {
        let json = serde_json::to_value(PolicyRefusal::AlreadyExists { id: 4 }).unwrap();
        assert_eq!(json["kind"], "already_exists");
        assert_eq!(json["id"], 4);
    }
}
