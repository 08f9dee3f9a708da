//! Schedule evaluation: decides whether a scheduled run starts on this pass
//! and renders the "next scheduled event" label.
//!
//! Matching compares the current `HH:MM` against the configured slot. With
//! the default tolerance of zero the comparison is exact, so a pass that
//! does not land inside the slot's minute misses that slot for the day.

use serde::Deserialize;
use time::Date;
use tracing::{debug, info};

use crate::clock::WallClock;
use crate::watering::{ScheduleTime, WateringConfig};

// ---------------------------------------------------------------------------
// Skip flag
// ---------------------------------------------------------------------------

/// One-shot suppressor for the next scheduled run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkipFlag(bool);

impl SkipFlag {
    pub fn set(&mut self) {
        self.0 = true;
    }

    pub fn clear(&mut self) {
        self.0 = false;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }

    /// Read and clear.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.0)
    }
}

/// When a set skip flag is consumed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// By the very next evaluation pass, whether or not a slot matched.
    #[default]
    NextPass,
    /// Only by a pass where a slot matched and would otherwise have fired.
    NextEvent,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    None,
    StartMorning,
    StartEvening,
}

impl ScheduleDecision {
    /// Scheduled `(upper, lower)` durations for a start decision.
    pub fn durations(&self, cfg: &WateringConfig) -> Option<(u32, u32)> {
        match self {
            Self::None => None,
            Self::StartMorning => Some(cfg.morning_durations.lines()),
            Self::StartEvening => Some(cfg.evening_durations.lines()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Morning,
    Evening,
}

impl Slot {
    fn time(self, cfg: &WateringConfig) -> &ScheduleTime {
        match self {
            Self::Morning => &cfg.morning_time,
            Self::Evening => &cfg.evening_time,
        }
    }

    fn decision(self) -> ScheduleDecision {
        match self {
            Self::Morning => ScheduleDecision::StartMorning,
            Self::Evening => ScheduleDecision::StartEvening,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct ScheduleEvaluator {
    tolerance_min: u8,
    policy: SkipPolicy,
    /// Slot times already fired or skipped, and the day they belong to.
    handled: Option<(Date, Vec<ScheduleTime>)>,
}

impl ScheduleEvaluator {
    pub fn new(tolerance_min: u8, policy: SkipPolicy) -> Self {
        Self {
            tolerance_min,
            policy,
            handled: None,
        }
    }

    /// One evaluation pass. A set skip flag is consumed according to the
    /// configured [`SkipPolicy`].
    pub fn evaluate(
        &mut self,
        now: &WallClock,
        cfg: &WateringConfig,
        skip: &mut SkipFlag,
        session_active: bool,
    ) -> ScheduleDecision {
        let matched = self.matching_slot(now, cfg);

        let skipped = match self.policy {
            SkipPolicy::NextPass => skip.take(),
            SkipPolicy::NextEvent => matched.is_some() && !session_active && skip.take(),
        };

        if session_active {
            debug!("schedule check: session active");
            return ScheduleDecision::None;
        }

        let Some(slot) = matched else {
            if skipped {
                info!(now = %now.hhmm(), "skip flag consumed with no slot due");
            }
            return ScheduleDecision::None;
        };

        self.mark_handled(now.date, slot.time(cfg));
        if skipped {
            info!(slot = %slot.time(cfg), "scheduled watering skipped");
            return ScheduleDecision::None;
        }
        slot.decision()
    }

    /// Morning is tried first, so identical morning and evening times
    /// resolve to the morning slot.
    fn matching_slot(&self, now: &WallClock, cfg: &WateringConfig) -> Option<Slot> {
        [Slot::Morning, Slot::Evening].into_iter().find(|&slot| {
            let t = slot.time(cfg);
            !self.is_handled(now.date, t) && self.within_window(now, t)
        })
    }

    // Keyed by time, not by slot, so identical morning and evening times
    // share one entry and fire once.
    fn is_handled(&self, day: Date, t: &ScheduleTime) -> bool {
        self.handled
            .as_ref()
            .is_some_and(|(d, times)| *d == day && times.contains(t))
    }

    fn mark_handled(&mut self, day: Date, t: &ScheduleTime) {
        if let Some((d, times)) = &mut self.handled {
            if *d == day {
                times.push(t.clone());
                return;
            }
        }
        self.handled = Some((day, vec![t.clone()]));
    }

    fn within_window(&self, now: &WallClock, slot: &ScheduleTime) -> bool {
        if self.tolerance_min == 0 {
            return now.hhmm() == slot.as_str();
        }
        let late = now.minute_of_day() as i32 - slot.minute_of_day() as i32;
        (0..=self.tolerance_min as i32).contains(&late)
    }
}

// ---------------------------------------------------------------------------
// Next-event label
// ---------------------------------------------------------------------------

fn period_of_day(hour: u8) -> &'static str {
    match hour {
        0..=5 => "Night",
        6..=11 => "Morning",
        12..=16 => "Afternoon",
        _ => "Evening",
    }
}

/// `"<Today|Tomorrow> - <HH:MM> (<Period>)"`, using plain string order.
pub fn describe_next(now: &WallClock, cfg: &WateringConfig) -> String {
    let now = now.hhmm();
    let (label, target) = if now.as_str() < cfg.morning_time.as_str() {
        ("Today", &cfg.morning_time)
    } else if now.as_str() < cfg.evening_time.as_str() {
        ("Today", &cfg.evening_time)
    } else {
        ("Tomorrow", &cfg.morning_time)
    };
    format!("{label} - {target} ({})", period_of_day(target.hour()))
}

// ===========================================================================
// Tests
// ===========================================================================
