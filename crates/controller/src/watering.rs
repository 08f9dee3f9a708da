//! Watering configuration: the two daily schedule slots and the per-line
//! durations for scheduled and manual runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::store::StoreError;

const DEFAULT_MORNING: &str = "07:00";
const DEFAULT_EVENING: &str = "18:00";
const DEFAULT_DURATION_SEC: u32 = 60;

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid time of day '{0}' (expected zero-padded HH:MM)")]
pub struct InvalidTimeOfDay(pub String);

/// A zero-padded `HH:MM` string. Ordering is lexicographic, which matches
/// chronological order only because both fields are two digits wide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTime(String);

impl ScheduleTime {
    pub fn parse(s: &str) -> Result<Self, InvalidTimeOfDay> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && [0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit());
        if !well_formed {
            return Err(InvalidTimeOfDay(s.to_string()));
        }
        let hour = two_digits(&bytes[0..2]);
        let minute = two_digits(&bytes[3..5]);
        if hour > 23 || minute > 59 {
            return Err(InvalidTimeOfDay(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hour(&self) -> u8 {
        two_digits(&self.0.as_bytes()[0..2])
    }

    pub fn minute(&self) -> u8 {
        two_digits(&self.0.as_bytes()[3..5])
    }

    pub fn minute_of_day(&self) -> u16 {
        self.hour() as u16 * 60 + self.minute() as u16
    }
}

fn two_digits(b: &[u8]) -> u8 {
    (b[0] - b'0') * 10 + (b[1] - b'0')
}

impl TryFrom<String> for ScheduleTime {
    type Error = InvalidTimeOfDay;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ScheduleTime> for String {
    fn from(t: ScheduleTime) -> Self {
        t.0
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Persisted form
// ---------------------------------------------------------------------------

fn default_morning() -> ScheduleTime {
    ScheduleTime(DEFAULT_MORNING.to_string())
}

fn default_evening() -> ScheduleTime {
    ScheduleTime(DEFAULT_EVENING.to_string())
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_SEC
}

/// A malformed persisted value is replaced by its own default so the rest
/// of the document survives.
fn or_default<'de, D, T>(d: D, field: &'static str, fallback: fn() -> T) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = serde_json::Value::deserialize(d)?;
    Ok(serde_json::from_value(raw).unwrap_or_else(|e| {
        warn!(field, "persisted value malformed ({e}); using default");
        fallback()
    }))
}

fn morning_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<ScheduleTime, D::Error> {
    or_default(d, "morning_time", default_morning)
}

fn evening_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<ScheduleTime, D::Error> {
    or_default(d, "evening_time", default_evening)
}

fn duration_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    or_default(d, "duration", default_duration)
}

fn valves_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<ValveDurations, D::Error> {
    or_default(d, "valve durations", ValveDurations::default)
}

fn manual_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<ManualDurations, D::Error> {
    or_default(d, "manual_durations", ManualDurations::default)
}

/// Scheduled durations in seconds. `valve1` drives the upper line and
/// `valve2` the lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveDurations {
    #[serde(default = "default_duration", deserialize_with = "duration_or_default")]
    pub valve1: u32,
    #[serde(default = "default_duration", deserialize_with = "duration_or_default")]
    pub valve2: u32,
}

impl Default for ValveDurations {
    fn default() -> Self {
        Self {
            valve1: DEFAULT_DURATION_SEC,
            valve2: DEFAULT_DURATION_SEC,
        }
    }
}

impl ValveDurations {
    /// `(upper, lower)` seconds.
    pub fn lines(&self) -> (u32, u32) {
        (self.valve1, self.valve2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualDurations {
    #[serde(default = "default_duration", deserialize_with = "duration_or_default")]
    pub upper: u32,
    #[serde(default = "default_duration", deserialize_with = "duration_or_default")]
    pub lower: u32,
}

impl Default for ManualDurations {
    fn default() -> Self {
        Self {
            upper: DEFAULT_DURATION_SEC,
            lower: DEFAULT_DURATION_SEC,
        }
    }
}

/// Field order here is the key order of the persisted JSON document.
/// Missing or malformed keys fall back to their own default; unknown keys
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WateringConfig {
    #[serde(default = "default_morning", deserialize_with = "morning_or_default")]
    pub morning_time: ScheduleTime,
    #[serde(default = "default_evening", deserialize_with = "evening_or_default")]
    pub evening_time: ScheduleTime,
    #[serde(default, deserialize_with = "valves_or_default")]
    pub morning_durations: ValveDurations,
    #[serde(default, deserialize_with = "valves_or_default")]
    pub evening_durations: ValveDurations,
    #[serde(default, deserialize_with = "manual_or_default")]
    pub manual_durations: ManualDurations,
}

impl Default for WateringConfig {
    fn default() -> Self {
        Self {
            morning_time: default_morning(),
            evening_time: default_evening(),
            morning_durations: ValveDurations::default(),
            evening_durations: ValveDurations::default(),
            manual_durations: ManualDurations::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Update requests
// ---------------------------------------------------------------------------

// Mirrors of the persisted structs without per-field defaults: an update
// must carry every field.

#[derive(Deserialize)]
struct ValveUpdate {
    valve1: u32,
    valve2: u32,
}

#[derive(Deserialize)]
struct ManualUpdate {
    upper: u32,
    lower: u32,
}

#[derive(Deserialize)]
struct ConfigUpdate {
    morning_time: ScheduleTime,
    evening_time: ScheduleTime,
    morning_durations: ValveUpdate,
    evening_durations: ValveUpdate,
    manual_durations: ManualUpdate,
}

impl WateringConfig {
    /// Parse a full replacement. Any missing or malformed field rejects the
    /// whole request.
    pub fn from_update(body: &[u8]) -> Result<Self, StoreError> {
        let u: ConfigUpdate =
            serde_json::from_slice(body).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        Ok(Self {
            morning_time: u.morning_time,
            evening_time: u.evening_time,
            morning_durations: ValveDurations {
                valve1: u.morning_durations.valve1,
                valve2: u.morning_durations.valve2,
            },
            evening_durations: ValveDurations {
                valve1: u.evening_durations.valve1,
                valve2: u.evening_durations.valve2,
            },
            manual_durations: ManualDurations {
                upper: u.manual_durations.upper,
                lower: u.manual_durations.lower,
            },
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
