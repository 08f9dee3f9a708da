//! Watering session state machine.
//!
//! ```text
//! Idle ──[start(u, l)]──▶ Active ──[elapsed >= max(u, l) | stop()]──▶ Idle
//! ```
//!
//! Both lines share one stop point: a line with the shorter duration stays
//! on until the longer one has elapsed.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::clock::WallClock;
use crate::lines::{LineDriver, LineId};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("Watering already in progress")]
    AlreadyActive,
    #[error("Not currently watering")]
    NotActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub start_tick: Duration,
    pub planned_secs: u32,
    pub upper_secs: u32,
    pub lower_secs: u32,
}

/// A state change worth an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Started { upper: u32, lower: u32 },
    Stopped,
}

impl SessionEvent {
    pub fn audit_line(&self, at: &WallClock) -> String {
        match self {
            Self::Started { upper, lower } => format!(
                "{} - Started watering (Upper={upper}s, Lower={lower}s)",
                at.stamp()
            ),
            Self::Stopped => format!("{} - Stopped watering", at.stamp()),
        }
    }
}

pub struct SessionController<L> {
    lines: L,
    session: Option<Session>,
}

impl<L: LineDriver> SessionController<L> {
    pub fn new(mut lines: L) -> Self {
        lines.all_off();
        Self {
            lines,
            session: None,
        }
    }

    /// Open the lines with a positive duration and start timing.
    pub fn start(
        &mut self,
        upper: u32,
        lower: u32,
        now: Duration,
    ) -> Result<SessionEvent, SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        if upper > 0 {
            self.lines.set_line(LineId::Upper, true);
        }
        if lower > 0 {
            self.lines.set_line(LineId::Lower, true);
        }

        let planned_secs = upper.max(lower);
        self.session = Some(Session {
            start_tick: now,
            planned_secs,
            upper_secs: upper,
            lower_secs: lower,
        });
        info!(upper, lower, planned_secs, "watering started");
        Ok(SessionEvent::Started { upper, lower })
    }

    /// Close both lines regardless of which were opened.
    pub fn stop(&mut self) -> Result<SessionEvent, SessionError> {
        let Some(session) = self.session.take() else {
            return Err(SessionError::NotActive);
        };
        self.lines.all_off();
        info!(
            upper = session.upper_secs,
            lower = session.lower_secs,
            planned_secs = session.planned_secs,
            "watering stopped"
        );
        Ok(SessionEvent::Stopped)
    }

    /// End the session once its planned duration has elapsed.
    pub fn tick(&mut self, now: Duration) -> Option<SessionEvent> {
        let session = self.session?;
        let elapsed = now.saturating_sub(session.start_tick);
        if elapsed < Duration::from_secs(session.planned_secs as u64) {
            return None;
        }
        debug!(elapsed_ms = elapsed.as_millis() as u64, "session duration elapsed");
        self.stop().ok()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Switch everything off without touching session bookkeeping.
    pub fn shutdown(&mut self) {
        self.lines.all_off();
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn lines(&self) -> &L {
        &self.lines
    }
}

// ===========================================================================
// Tests
// ===========================================================================
