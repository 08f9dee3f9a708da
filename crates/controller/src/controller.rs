//! Application state: everything the control loop owns, plus one method per
//! request the outside world can make.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::lines::LineDriver;
use crate::schedule::{describe_next, ScheduleDecision, ScheduleEvaluator, SkipFlag, SkipPolicy};
use crate::session::{SessionController, SessionError, SessionEvent};
use crate::store::{ConfigStore, Storage, StoreError};
use crate::watering::WateringConfig;

/// Interval between wall-clock resyncs.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub check_interval: Duration,
    pub tolerance_min: u8,
    pub skip_policy: SkipPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            tolerance_min: 0,
            skip_policy: SkipPolicy::NextPass,
        }
    }
}

/// Which lines a manual trigger opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Both,
    Upper,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    pub next_schedule: String,
    pub skip_next: bool,
}

pub struct Controller<C, S, L> {
    clock: C,
    store: ConfigStore<S>,
    config: WateringConfig,
    session: SessionController<L>,
    skip: SkipFlag,
    evaluator: ScheduleEvaluator,
    check_interval: Duration,
    last_check: Duration,
    last_resync: Duration,
}

impl<C: Clock, S: Storage, L: LineDriver> Controller<C, S, L> {
    pub fn new(clock: C, storage: S, lines: L, opts: ControllerOptions) -> Self {
        let mut store = ConfigStore::new(storage);
        let config = store.load_or_default();
        let now = clock.ticks();
        info!(
            check_interval_sec = opts.check_interval.as_secs(),
            tolerance_min = opts.tolerance_min,
            skip_policy = ?opts.skip_policy,
            "controller ready"
        );
        Self {
            clock,
            store,
            config,
            session: SessionController::new(lines),
            skip: SkipFlag::default(),
            evaluator: ScheduleEvaluator::new(opts.tolerance_min, opts.skip_policy),
            check_interval: opts.check_interval,
            last_check: now,
            last_resync: now,
        }
    }

    // ── Control loop ─────────────────────────────────────────────

    /// Expire a finished session, resync the clock when due, then run the
    /// schedule check when due.
    pub fn tick(&mut self) {
        let now = self.clock.ticks();

        if let Some(event) = self.session.tick(now) {
            self.audit(event);
        }

        if now.saturating_sub(self.last_resync) >= RESYNC_INTERVAL {
            self.clock.resync();
            self.last_resync = now;
        }

        if now.saturating_sub(self.last_check) >= self.check_interval {
            self.last_check = now;
            self.check_schedule();
        }
    }

    fn check_schedule(&mut self) {
        let wall = self.clock.now();
        let decision =
            self.evaluator
                .evaluate(&wall, &self.config, &mut self.skip, self.session.is_active());
        let Some((upper, lower)) = decision.durations(&self.config) else {
            return;
        };
        let slot = if decision == ScheduleDecision::StartMorning {
            "morning"
        } else {
            "evening"
        };
        info!(slot, at = %wall.hhmm(), "scheduled watering due");
        if let Err(e) = self.start(upper, lower) {
            warn!(slot, "scheduled watering not started: {e}");
        }
    }

    fn start(&mut self, upper: u32, lower: u32) -> Result<(), SessionError> {
        let event = self.session.start(upper, lower, self.clock.ticks())?;
        self.audit(event);
        Ok(())
    }

    fn audit(&mut self, event: SessionEvent) {
        let line = event.audit_line(&self.clock.now());
        self.store.append_audit(&line);
    }

    /// Lines off; used when the control loop exits.
    pub fn shutdown(&mut self) {
        if self.session.is_active() {
            if let Ok(event) = self.session.stop() {
                self.audit(event);
            }
        }
        self.session.shutdown();
    }

    // ── Requests ─────────────────────────────────────────────────

    pub fn config(&self) -> &WateringConfig {
        &self.config
    }

    /// The new config is live even when persisting it fails.
    pub fn update_config(&mut self, config: WateringConfig) -> Result<(), StoreError> {
        self.config = config;
        info!(
            morning = %self.config.morning_time,
            evening = %self.config.evening_time,
            "watering config updated"
        );
        self.store.save(&self.config).inspect_err(|e| {
            error!("config update applied but not persisted: {e}");
        })
    }

    pub fn reset_config(&mut self) -> Result<(), StoreError> {
        let result = self.store.reset().map(|_| ());
        self.config = ConfigStore::<S>::defaults();
        info!("watering config reset to defaults");
        result.inspect_err(|e| error!("config reset applied but not persisted: {e}"))
    }

    pub fn trigger(&mut self, trigger: Trigger) -> Result<(), SessionError> {
        let manual = self.config.manual_durations;
        let (upper, lower) = match trigger {
            Trigger::Both => (manual.upper, manual.lower),
            Trigger::Upper => (manual.upper, 0),
            Trigger::Lower => (0, manual.lower),
        };
        info!(?trigger, "manual trigger");
        self.start(upper, lower)
    }

    pub fn stop(&mut self) -> Result<(), SessionError> {
        let event = self.session.stop()?;
        self.audit(event);
        Ok(())
    }

    pub fn skip_next(&mut self) {
        self.skip.set();
        info!("next scheduled watering will be skipped");
    }

    pub fn cancel_skip(&mut self) {
        self.skip.clear();
        info!("skip cancelled");
    }

    pub fn schedule_status(&self) -> ScheduleStatus {
        ScheduleStatus {
            next_schedule: describe_next(&self.clock.now(), &self.config),
            skip_next: self.skip.is_set(),
        }
    }

    pub fn is_watering(&self) -> bool {
        self.session.is_active()
    }

    pub fn audit_log(&self) -> Result<Option<String>, StoreError> {
        self.store.audit_log()
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &SessionController<L> {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut ConfigStore<S> {
        &mut self.store
    }
}

// ===========================================================================
// Tests
// ===========================================================================
