//! Persisted key/value session document.
//!
//! The session survives process restarts. It is loaded once at startup,
//! written after every mutation and deleted on logout. Loading never
//! overwrites a slot that already holds a value, so an in-progress
//! configuration is not clobbered by a stale file.
//!
//! Only the foreground owner mutates the session; run workers hand their
//! results back instead of writing here.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::device::DevicePreference;
use crate::run::{RunConfig, RunResult};
use crate::zone::ZoneSet;

pub const DEFAULT_SESSION_PATH: &str = "epm_session.json";

/// Well-known session keys.
pub mod keys {
    pub const LOGGED_IN: &str = "logged_in";
    pub const USER: &str = "user";
    pub const VIDEO_PATH: &str = "video_path";
    pub const TRIM_START_S: &str = "trim_start_s";
    pub const TRIM_END_S: &str = "trim_end_s";
    pub const ZONE_SET: &str = "zone_set";
    pub const DEVICE_PREFERENCE: &str = "device_preference";
    pub const THEME_MODE: &str = "theme_mode";
    pub const RUN_RESULT: &str = "run_result";
}

#[derive(Debug)]
pub struct SessionState {
    path: PathBuf,
    values: Map<String, Value>,
}

impl SessionState {
    /// An empty session backed by `path`; nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Map::new(),
        }
    }

    /// Create a session backed by `path` and merge any saved document.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut session = Self::new(path);
        session.load()?;
        Ok(session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the saved document into unset or empty slots.
    pub fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session {}", self.path.display()))?;
        let saved: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse session {}", self.path.display()))?;
        let Value::Object(saved) = saved else {
            return Err(anyhow!("session {} is not a JSON object", self.path.display()));
        };
        for (key, value) in saved {
            let unset = self.values.get(&key).map_or(true, is_empty_value);
            if unset {
                self.values.insert(key, value);
            }
        }
        log::debug!("session loaded from {}", self.path.display());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("session key '{key}' has an unexpected shape")),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        self.insert(key, value)?;
        self.save()
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Drop every value and delete the backing file.
    pub fn clear(&mut self) -> Result<()> {
        self.values.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to delete session {}", self.path.display())),
        }
    }

    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.values).context("failed to encode session")?;
        write_atomic(&self.path, &data)
            .with_context(|| format!("failed to write session {}", self.path.display()))
    }

    /// Persist the parts of a run configuration the user edits.
    pub fn store_run_config(&mut self, config: &RunConfig) -> Result<()> {
        self.insert(keys::VIDEO_PATH, &config.video_path)?;
        self.insert(keys::TRIM_START_S, config.start_s)?;
        self.insert(keys::TRIM_END_S, config.end_s)?;
        self.insert(keys::ZONE_SET, &config.zone_set)?;
        self.insert(keys::DEVICE_PREFERENCE, config.device)?;
        self.save()
    }

    pub fn video_path(&self) -> Result<Option<String>> {
        self.get_as(keys::VIDEO_PATH)
    }

    pub fn saved_trim(&self) -> Result<Option<(f64, f64)>> {
        let start: Option<f64> = self.get_as(keys::TRIM_START_S)?;
        let end: Option<f64> = self.get_as(keys::TRIM_END_S)?;
        Ok(start.zip(end))
    }

    pub fn saved_zone_set(&self) -> Result<Option<ZoneSet>> {
        self.get_as(keys::ZONE_SET)
    }

    pub fn device_preference(&self) -> Result<Option<DevicePreference>> {
        self.get_as(keys::DEVICE_PREFERENCE)
    }

    pub fn set_device_preference(&mut self, preference: DevicePreference) -> Result<()> {
        self.set(keys::DEVICE_PREFERENCE, preference)
    }

    pub fn store_run_result(&mut self, result: &RunResult) -> Result<()> {
        self.set(keys::RUN_RESULT, result)
    }

    pub fn run_result(&self) -> Result<Option<RunResult>> {
        self.get_as(keys::RUN_RESULT)
    }

    pub fn clear_run_result(&mut self) -> Result<()> {
        self.remove(keys::RUN_RESULT)
    }

    fn insert(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("failed to encode session key '{key}'"))?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Null, `false`, and empty strings or collections count as unset.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_mutation_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = SessionState::new(&path);
        session.set(keys::THEME_MODE, "dark").unwrap();
        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk[keys::THEME_MODE], "dark");

        session.remove(keys::THEME_MODE).unwrap();
        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk.get(keys::THEME_MODE).is_none());
    }

    #[test]
    fn load_fills_only_unset_slots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(
            &path,
            json!({
                "theme_mode": "light",
                "logged_in": true,
                "user": "saved",
                "video_path": "/old.mp4"
            })
            .to_string(),
        )
        .unwrap();

        let mut session = SessionState::new(&path);
        session.insert(keys::THEME_MODE, "dark").unwrap();
        session.insert(keys::LOGGED_IN, false).unwrap();
        session.insert(keys::USER, "").unwrap();
        session.load().unwrap();

        assert_eq!(session.get(keys::THEME_MODE), Some(&json!("dark")));
        assert_eq!(session.get(keys::LOGGED_IN), Some(&json!(true)));
        assert_eq!(session.get(keys::USER), Some(&json!("saved")));
        assert_eq!(session.video_path().unwrap().as_deref(), Some("/old.mp4"));
    }

    #[test]
    fn clear_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = SessionState::new(&path);
        session.set(keys::LOGGED_IN, true).unwrap();
        assert!(path.exists());
        session.clear().unwrap();
        assert!(!path.exists());
        assert!(session.get(keys::LOGGED_IN).is_none());
        session.clear().unwrap();
    }

    #[test]
    fn malformed_session_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(SessionState::open(&path).is_err());
    }

    #[test]
    fn typed_getter_rejects_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionState::new(dir.path().join("s.json"));
        session.set(keys::DEVICE_PREFERENCE, "gpu-please").unwrap();
        assert!(session.device_preference().is_err());
        session.set(keys::DEVICE_PREFERENCE, "cpu").unwrap();
        assert_eq!(session.device_preference().unwrap(), Some(DevicePreference::Cpu));
    }
}
