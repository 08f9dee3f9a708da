//! Persistence for the watering config and the bounded audit log.
//!
//! [`Storage`] is the raw byte/line interface to whatever medium holds the
//! files; [`ConfigStore`] layers the JSON document and the fallback-to-
//! defaults policy on top of it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::watering::WateringConfig;

/// Most recent audit entries kept on disk.
pub const AUDIT_LOG_CAPACITY: usize = 25;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no persisted configuration")]
    NotFound,
    #[error("persisted configuration is malformed: {0}")]
    Parse(String),
    #[error("storage read failed: {0}")]
    Read(String),
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("invalid configuration: {0}")]
    InvalidInput(String),
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

pub trait Storage {
    fn read_config(&self) -> Result<Option<Vec<u8>>, StoreError>;
    fn write_config(&mut self, bytes: &[u8]) -> Result<(), StoreError>;
    fn append_audit(&mut self, entry: &str) -> Result<(), StoreError>;
    fn read_audit(&self) -> Result<Option<String>, StoreError>;
}

/// Append `entry` to `existing` and keep only the trailing
/// [`AUDIT_LOG_CAPACITY`] lines, each newline-terminated.
pub(crate) fn append_trimmed(existing: &str, entry: &str) -> String {
    let mut lines: Vec<&str> = existing.lines().collect();
    lines.push(entry);
    let skip = lines.len().saturating_sub(AUDIT_LOG_CAPACITY);
    let mut out = String::new();
    for line in &lines[skip..] {
        out.push_str(line);
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

pub struct FsStorage {
    config_path: PathBuf,
    audit_path: PathBuf,
}

impl FsStorage {
    pub fn new(config_path: impl Into<PathBuf>, audit_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            audit_path: audit_path.into(),
        }
    }
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write to `<path>.tmp`, then rename over `path`, so readers see either the
/// old or the new file.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}

impl Storage for FsStorage {
    fn read_config(&self) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.config_path).map_err(|e| {
            StoreError::Read(format!("{}: {e}", self.config_path.display()))
        })
    }

    fn write_config(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.config_path, bytes).map_err(|e| {
            StoreError::Write(format!("{}: {e}", self.config_path.display()))
        })
    }

    fn append_audit(&mut self, entry: &str) -> Result<(), StoreError> {
        let existing = self.read_audit()?.unwrap_or_default();
        let updated = append_trimmed(&existing, entry);
        write_atomic(&self.audit_path, updated.as_bytes()).map_err(|e| {
            StoreError::Write(format!("{}: {e}", self.audit_path.display()))
        })
    }

    fn read_audit(&self) -> Result<Option<String>, StoreError> {
        let bytes = read_optional(&self.audit_path)
            .map_err(|e| StoreError::Read(format!("{}: {e}", self.audit_path.display())))?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemStorage {
    pub(crate) config: Option<Vec<u8>>,
    pub(crate) audit: Option<String>,
    pub(crate) fail_writes: bool,
}

#[cfg(test)]
impl Storage for MemStorage {
    fn read_config(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.config.clone())
    }

    fn write_config(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Write("disk full".into()));
        }
        self.config = Some(bytes.to_vec());
        Ok(())
    }

    fn append_audit(&mut self, entry: &str) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Write("disk full".into()));
        }
        let existing = self.audit.take().unwrap_or_default();
        self.audit = Some(append_trimmed(&existing, entry));
        Ok(())
    }

    fn read_audit(&self) -> Result<Option<String>, StoreError> {
        Ok(self.audit.clone())
    }
}

// ---------------------------------------------------------------------------
// Config store
// ---------------------------------------------------------------------------

pub struct ConfigStore<S> {
    storage: S,
}

impl<S: Storage> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn defaults() -> WateringConfig {
        WateringConfig::default()
    }

    pub fn load(&self) -> Result<WateringConfig, StoreError> {
        let bytes = self.storage.read_config()?.ok_or(StoreError::NotFound)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse(e.to_string()))
    }

    pub fn save(&mut self, config: &WateringConfig) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(config).map_err(|e| StoreError::Write(e.to_string()))?;
        self.storage.write_config(&bytes)
    }

    pub fn reset(&mut self) -> Result<WateringConfig, StoreError> {
        let defaults = Self::defaults();
        self.save(&defaults)?;
        Ok(defaults)
    }

    /// Startup path: a missing or unreadable document is replaced with the
    /// defaults, which are also written back.
    pub fn load_or_default(&mut self) -> WateringConfig {
        match self.load() {
            Ok(cfg) => {
                info!(
                    morning = %cfg.morning_time,
                    evening = %cfg.evening_time,
                    "watering config loaded"
                );
                cfg
            }
            Err(e) => {
                warn!("loading watering config failed ({e}); writing defaults");
                let defaults = Self::defaults();
                if let Err(e) = self.save(&defaults) {
                    error!("failed to save default config: {e}");
                }
                defaults
            }
        }
    }

    /// Audit failures never fail the operation that produced the entry.
    pub fn append_audit(&mut self, entry: &str) {
        info!(target: "audit", "{entry}");
        if let Err(e) = self.storage.append_audit(entry) {
            error!("audit append failed: {e}");
        }
    }

    pub fn audit_log(&self) -> Result<Option<String>, StoreError> {
        self.storage.read_audit()
    }

    #[cfg(test)]
    pub(crate) fn storage(&self) -> &S {
        &self.storage
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

// ===========================================================================
// Tests
// ===========================================================================
