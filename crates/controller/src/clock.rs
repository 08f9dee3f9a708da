//! Time sources: wall-clock time for schedule matching and audit stamps, and
//! a monotonic tick counter for measuring session length.

use std::time::{Duration, Instant};

use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Wall-clock time
// ---------------------------------------------------------------------------

/// Local date plus hour and minute. Seconds are irrelevant to scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(date: Date, hour: u8, minute: u8) -> Self {
        Self { date, hour, minute }
    }

    pub fn from_datetime(dt: OffsetDateTime) -> Self {
        Self {
            date: dt.date(),
            hour: dt.hour(),
            minute: dt.minute(),
        }
    }

    /// Zero-padded `HH:MM`.
    pub fn hhmm(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    /// `YYYY-MM-DD HH:MM`, the prefix of every audit log entry.
    pub fn stamp(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            self.date.year(),
            self.date.month() as u8,
            self.date.day(),
            self.hour,
            self.minute
        )
    }

    pub fn minute_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

// ---------------------------------------------------------------------------
// Clock trait
// ---------------------------------------------------------------------------

pub trait Clock {
    /// Current local wall-clock time.
    fn now(&self) -> WallClock;

    /// Monotonic time since the clock was created.
    fn ticks(&self) -> Duration;

    /// Re-read the authoritative time source.
    fn resync(&mut self) {}
}

// ---------------------------------------------------------------------------
// System clock
// ---------------------------------------------------------------------------

/// Wall time is anchored to the host clock at construction and at every
/// [`resync`](Clock::resync); between syncs it advances with the monotonic
/// clock, so a host clock step only becomes visible on the next resync.
pub struct SystemClock {
    offset: UtcOffset,
    boot: Instant,
    anchor_tick: Instant,
    anchor_wall: OffsetDateTime,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        let now = Instant::now();
        let wall = OffsetDateTime::now_utc().to_offset(offset);
        info!(%offset, now = %WallClock::from_datetime(wall).stamp(), "wall clock synchronised");
        Self {
            offset,
            boot: now,
            anchor_tick: now,
            anchor_wall: wall,
        }
    }

    fn current(&self) -> OffsetDateTime {
        self.anchor_wall + self.anchor_tick.elapsed()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> WallClock {
        WallClock::from_datetime(self.current())
    }

    fn ticks(&self) -> Duration {
        self.boot.elapsed()
    }

    fn resync(&mut self) {
        let fresh = OffsetDateTime::now_utc().to_offset(self.offset);
        let drift = fresh - self.current();
        self.anchor_tick = Instant::now();
        self.anchor_wall = fresh;
        info!(drift_sec = drift.whole_seconds(), "wall clock resynchronised");
        debug!(now = %WallClock::from_datetime(fresh).stamp(), "resync anchor");
    }
}

// ---------------------------------------------------------------------------
// Manual clock (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use manual::ManualClock;


// ===========================================================================
// Tests
// ===========================================================================
