//! Persisted stream-selection storage.
//!
//! Selections are stored as flat key/value pairs under keys derived from
//! [`SelectionKey`], so they round-trip exactly across process restarts and
//! survive devices coming and going. Two stores are provided: an in-memory
//! one for tests and ephemeral runs, and a TOML file store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::profile::SelectionKey;

/// One persisted stream selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSelection {
    /// Whether the stream should be enabled at all.
    pub enabled: bool,
    /// Ordinal index into the catalog's profile list for the group.
    pub chosen_index: i64,
}

impl Default for StreamSelection {
    fn default() -> Self {
        Self {
            enabled: false,
            chosen_index: 0,
        }
    }
}

/// Key/value preference store.
///
/// Writes are best-effort: implementations log persistence failures rather
/// than surfacing them, matching how settings stores behave at this layer.
pub trait Preferences: Send + Sync {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_int(&self, key: &str, default: i64) -> i64;
    fn set_bool(&self, key: &str, value: bool);
    fn set_int(&self, key: &str, value: i64);

    /// The selection persisted under `key`, falling back to disabled/index 0.
    fn selection(&self, key: &SelectionKey) -> StreamSelection {
        StreamSelection {
            enabled: self.get_bool(&key.enabled_key(), false),
            chosen_index: self.get_int(&key.index_key(), 0),
        }
    }

    /// Persist a selection under `key`.
    fn set_selection(&self, key: &SelectionKey, selection: StreamSelection) {
        self.set_bool(&key.enabled_key(), selection.enabled);
        self.set_int(&key.index_key(), selection.chosen_index);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefMap {
    #[serde(default)]
    bools: BTreeMap<String, bool>,
    #[serde(default)]
    ints: BTreeMap<String, i64>,
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryPrefs {
    values: Mutex<PrefMap>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPrefs {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.lock() {
            Ok(map) => map.bools.get(key).copied().unwrap_or(default),
            Err(_) => default,
        }
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.lock() {
            Ok(map) => map.ints.get(key).copied().unwrap_or(default),
            Err(_) => default,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        if let Ok(mut map) = self.values.lock() {
            map.bools.insert(key.to_string(), value);
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        if let Ok(mut map) = self.values.lock() {
            map.ints.insert(key.to_string(), value);
        }
    }
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("failed to read preferences file: {0}")]
    Io(#[from] std::io::Error),
    #[error("preferences file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// TOML-file-backed store.
///
/// The whole map is rewritten on every set; selection churn is rare enough
/// that this stays cheap.
pub struct FilePrefs {
    path: PathBuf,
    values: Mutex<PrefMap>,
}

impl FilePrefs {
    /// Load preferences from `path`, starting empty if the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PrefMap::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &PrefMap) {
        let text = match toml::to_string_pretty(map) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to serialize preferences: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, text) {
            warn!(path = %self.path.display(), "failed to write preferences: {e}");
        }
    }
}

impl Preferences for FilePrefs {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.lock() {
            Ok(map) => map.bools.get(key).copied().unwrap_or(default),
            Err(_) => default,
        }
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.lock() {
            Ok(map) => map.ints.get(key).copied().unwrap_or(default),
            Err(_) => default,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        if let Ok(mut map) = self.values.lock() {
            map.bools.insert(key.to_string(), value);
            self.persist(&map);
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        if let Ok(mut map) = self.values.lock() {
            map.ints.insert(key.to_string(), value);
            self.persist(&map);
        }
    }
}
