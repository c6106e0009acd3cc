//! Driver preference blobs.
//!
//! Two small, independent JSON files: the driver PIN map and the
//! skipped-driver list. Each is addressed by its own private path and
//! written via a temp file + rename so a crash mid-write never leaves a
//! truncated blob.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, PrefsError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), PrefsError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Driver id → PIN map.
pub struct PinStore {
    path: PathBuf,
}

impl PinStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<HashMap<String, String>, PrefsError> {
        read_json(&self.path)
    }

    pub fn set_pin(&self, driver: &str, pin: &str) -> Result<(), PrefsError> {
        let mut pins = self.load()?;
        pins.insert(driver.to_owned(), pin.to_owned());
        write_json(&self.path, &pins)
    }

    pub fn remove(&self, driver: &str) -> Result<bool, PrefsError> {
        let mut pins = self.load()?;
        let removed = pins.remove(driver).is_some();
        if removed {
            write_json(&self.path, &pins)?;
        }
        Ok(removed)
    }
}

/// Drivers excluded from the sign-in rotation.
pub struct SkippedDrivers {
    path: PathBuf,
}

impl SkippedDrivers {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<String>, PrefsError> {
        read_json(&self.path)
    }

    pub fn add(&self, driver: &str) -> Result<(), PrefsError> {
        let mut skipped = self.load()?;
        if !skipped.iter().any(|d| d == driver) {
            skipped.push(driver.to_owned());
            write_json(&self.path, &skipped)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), PrefsError> {
        write_json(&self.path, &Vec::<String>::new())
    }
}
