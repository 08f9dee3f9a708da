//! Water line control via GPIO. The `gpio` feature gates the real rppal
//! driver; without it, a mock board logs state changes.

use anyhow::Result;
use std::fmt;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Line identity + driver trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineId {
    Upper,
    Lower,
}

impl LineId {
    pub const ALL: [LineId; 2] = [LineId::Upper, LineId::Lower];
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upper => write!(f, "upper"),
            Self::Lower => write!(f, "lower"),
        }
    }
}

pub trait LineDriver {
    fn set_line(&mut self, line: LineId, on: bool);

    fn all_off(&mut self) {
        for line in LineId::ALL {
            self.set_line(line, false);
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Real GPIO line board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct LineBoard {
    upper: OutputPin,
    lower: OutputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "gpio")]
impl LineBoard {
    pub(crate) fn new(upper_pin: u8, lower_pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut board = Self {
            upper: gpio.get(upper_pin)?.into_output(),
            lower: gpio.get(lower_pin)?.into_output(),
            active_low,
        };

        // Fail-safe: ensure "OFF" at startup
        board.all_off();
        tracing::info!(upper_pin, lower_pin, active_low, "line board initialised");
        Ok(board)
    }
}

#[cfg(feature = "gpio")]
impl LineDriver for LineBoard {
    fn set_line(&mut self, line: LineId, on: bool) {
        let pin = match line {
            LineId::Upper => &mut self.upper,
            LineId::Lower => &mut self.lower,
        };
        // active-low relay: LOW = ON; active-high relay: HIGH = ON
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        tracing::debug!(%line, state = on_off(on), "line set");
    }
}

// ---------------------------------------------------------------------------
// Mock line board (no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct LineBoard {
    pub(super) upper: bool,
    pub(super) lower: bool,
}

#[cfg(not(feature = "gpio"))]
impl LineBoard {
    pub(crate) fn new(upper_pin: u8, lower_pin: u8, _active_low: bool) -> Result<Self> {
        tracing::info!(
            upper_pin,
            lower_pin,
            "[mock-gpio] line board initialised (no hardware)"
        );
        Ok(Self {
            upper: false,
            lower: false,
        })
    }
}

#[cfg(not(feature = "gpio"))]
impl LineDriver for LineBoard {
    fn set_line(&mut self, line: LineId, on: bool) {
        match line {
            LineId::Upper => self.upper = on,
            LineId::Lower => self.lower = on,
        }
        tracing::info!(%line, state = on_off(on), "[mock-gpio] line set");
    }
}

// ---------------------------------------------------------------------------
// Recording driver (tests)
// ---------------------------------------------------------------------------

/// Remembers every write so tests can assert on actuation order.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingLines {
    pub(crate) upper: bool,
    pub(crate) lower: bool,
    pub(crate) writes: Vec<(LineId, bool)>,
}

#[cfg(test)]
impl RecordingLines {
    pub(crate) fn is_on(&self, line: LineId) -> bool {
        match line {
            LineId::Upper => self.upper,
            LineId::Lower => self.lower,
        }
    }
}

#[cfg(test)]
impl LineDriver for RecordingLines {
    fn set_line(&mut self, line: LineId, on: bool) {
        match line {
            LineId::Upper => self.upper = on,
            LineId::Lower => self.lower = on,
        }
        self.writes.push((line, on));
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    // -- LineBoard (mock) ---------------------------------------------------

    #[test]
    fn line_board_new_all_off() {
        let board = LineBoard::new(26, 27, false).unwrap();
        assert!(!board.upper);
        assert!(!board.lower);
    }

    #[test]
    fn line_board_set_on() {
        let mut board = LineBoard::new(26, 27, false).unwrap();
        board.set_line(LineId::Upper, true);
        assert!(board.upper);
        assert!(!board.lower);
    }

    #[test]
    fn line_board_set_off() {
        let mut board = LineBoard::new(26, 27, false).unwrap();
        board.set_line(LineId::Lower, true);
        board.set_line(LineId::Lower, false);
        assert!(!board.lower);
    }

    #[test]
    fn line_board_all_off_resets_everything() {
        let mut board = LineBoard::new(26, 27, false).unwrap();
        board.set_line(LineId::Upper, true);
        board.set_line(LineId::Lower, true);
        board.all_off();
        assert!(!board.upper);
        assert!(!board.lower);
    }

    // -- RecordingLines -----------------------------------------------------

    #[test]
    fn recording_lines_all_off_writes_both_lines() {
        let mut lines = RecordingLines::default();
        lines.all_off();
        assert_eq!(
            lines.writes,
            vec![(LineId::Upper, false), (LineId::Lower, false)]
        );
    }

    #[test]
    fn line_id_display() {
        assert_eq!(LineId::Upper.to_string(), "upper");
        assert_eq!(LineId::Lower.to_string(), "lower");
    }
}
