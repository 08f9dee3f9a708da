//! Process settings: which pins drive the lines, where files live, and how
//! the schedule check runs. Loaded once from TOML at startup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use time::UtcOffset;
use tracing::warn;

use crate::controller::ControllerOptions;
use crate::schedule::SkipPolicy;

// ---------------------------------------------------------------------------
// Settings file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub lines: LineSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub clock: ClockSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineSettings {
    pub upper_gpio_pin: i64,
    pub lower_gpio_pin: i64,
    pub active_low: bool,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            upper_gpio_pin: 26,
            lower_gpio_pin: 27,
            active_low: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub config_path: String,
    pub audit_log_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            config_path: "config.json".into(),
            audit_log_path: "watering.log".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSettings {
    pub check_interval_sec: i64,
    pub tolerance_min: i64,
    pub skip_policy: SkipPolicy,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            check_interval_sec: 60,
            tolerance_min: 0,
            skip_policy: SkipPolicy::NextPass,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockSettings {
    pub utc_offset_min: i64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            utc_offset_min: 330,
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the Raspberry Pi 40-pin header available for general
/// use. GPIO 0-1 belong to the ID EEPROM; 28+ are not on the header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// A check interval above one minute could step over an exact `HH:MM`.
const MAX_CHECK_INTERVAL_SEC: i64 = 60;

const MAX_TOLERANCE_MIN: i64 = 59;

const MAX_UTC_OFFSET_MIN: i64 = 14 * 60;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Settings {
    /// Returns `Ok(())` or an error listing every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_lines(&mut errors);
        self.validate_storage(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_clock(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "settings validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_lines(&self, errors: &mut Vec<String>) {
        let l = &self.lines;
        let mut valid = true;
        let pins = [
            ("upper_gpio_pin", l.upper_gpio_pin),
            ("lower_gpio_pin", l.lower_gpio_pin),
        ];
        for (name, pin) in pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                valid = false;
                errors.push(format!(
                    "lines.{name}: {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if valid && l.upper_gpio_pin == l.lower_gpio_pin {
            errors.push(format!(
                "lines: upper and lower lines share GPIO pin {}",
                l.upper_gpio_pin
            ));
        }
    }

    fn validate_storage(&self, errors: &mut Vec<String>) {
        let s = &self.storage;
        if s.config_path.trim().is_empty() {
            errors.push("storage.config_path is empty".into());
        }
        if s.audit_log_path.trim().is_empty() {
            errors.push("storage.audit_log_path is empty".into());
        }
        if !s.config_path.trim().is_empty() && s.config_path == s.audit_log_path {
            errors.push(format!(
                "storage: config_path and audit_log_path are both '{}'",
                s.config_path
            ));
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let s = &self.schedule;
        if !(1..=MAX_CHECK_INTERVAL_SEC).contains(&s.check_interval_sec) {
            errors.push(format!(
                "schedule.check_interval_sec {} out of range [1, {MAX_CHECK_INTERVAL_SEC}]",
                s.check_interval_sec
            ));
        }
        if !(0..=MAX_TOLERANCE_MIN).contains(&s.tolerance_min) {
            errors.push(format!(
                "schedule.tolerance_min {} out of range [0, {MAX_TOLERANCE_MIN}]",
                s.tolerance_min
            ));
        }
    }

    fn validate_clock(&self, errors: &mut Vec<String>) {
        let offset = self.clock.utc_offset_min;
        if !(-MAX_UTC_OFFSET_MIN..=MAX_UTC_OFFSET_MIN).contains(&offset) {
            errors.push(format!(
                "clock.utc_offset_min {offset} out of range \
                 [-{MAX_UTC_OFFSET_MIN}, {MAX_UTC_OFFSET_MIN}]"
            ));
        }
    }

    // ── Derived values (valid settings only) ─────────────────────

    pub fn upper_pin(&self) -> u8 {
        self.lines.upper_gpio_pin as u8
    }

    pub fn lower_pin(&self) -> u8 {
        self.lines.lower_gpio_pin as u8
    }

    pub fn utc_offset(&self) -> Result<UtcOffset> {
        let secs = self.clock.utc_offset_min * 60;
        UtcOffset::from_whole_seconds(secs as i32)
            .with_context(|| format!("invalid utc offset: {} min", self.clock.utc_offset_min))
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            check_interval: Duration::from_secs(self.schedule.check_interval_sec as u64),
            tolerance_min: self.schedule.tolerance_min as u8,
            skip_policy: self.schedule.skip_policy,
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML settings file.
pub fn load(path: &str) -> Result<Settings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings: {path}"))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("failed to parse settings: {path}"))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings: {path}"))?;
    Ok(settings)
}

/// Like [`load`], but a missing file means built-in defaults.
pub fn load_or_default(path: &str) -> Result<Settings> {
    if !Path::new(path).exists() {
        warn!("settings file {path} not found; using built-in defaults");
        return Ok(Settings::default());
    }
    load(path)
}

// ===========================================================================
// Tests
// ===========================================================================
