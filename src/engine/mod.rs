//! # engine
//!
//! The rotation core. Everything in here is synchronous and free of I/O:
//! the orchestrator feeds it data fetched from the collaborators and
//! persists what comes out.
//!
//! ```text
//! universe ─▶ ranker ─▶ rotation ◀─ cooldown
//!                           │
//!                           ▼
//!                      valuation ─▶ guard ─▶ store
//! ```

pub mod cooldown;
pub mod guard;
pub mod ranker;
pub mod rotation;
pub mod valuation;

pub use cooldown::{CooldownChanges, CooldownLedger, CooldownStatus};
pub use guard::{PolicyRefusal, SnapshotWindow, WeekCalendar};
pub use rotation::{apply, rotate, RotationPlan};
