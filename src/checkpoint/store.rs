//! Durable key-value persistence for checkpoints and calibration values.
//!
//! Epistemic foundation:
//! - K_i: The persisted checkpoint is one opaque string under a fixed key
//! - K_i: The variables file is written atomically (write-then-rename)
//! - B_i: The file may not exist yet → empty store
//! - I^B: Crash during write → backup file provides recovery

use crate::checkpoint::SnapshotValidator;
use crate::models::{PersistedCheckpoint, PlrError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Key holding the serialized persisted checkpoint.
pub const CHECKPOINT_KEY: &str = "resume_meta_info";
/// Key holding the saved mesh profile name.
pub const MESH_PROFILE_KEY: &str = "saved_mesh_profile";

/// Key holding the calibrated Z height for a stepper.
pub fn z_offset_key(stepper: &str) -> String {
    format!("z_offset_{stepper}")
}

/// String-valued durable store owned by the host.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Store backed by a JSON object file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    backup_path: PathBuf,
    temp_path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| PlrError::io("creating variables directory", e))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            backup_path: with_suffix(path, ".bak"),
            temp_path: with_suffix(path, ".tmp"),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match self.read_map(&self.path) {
            Ok(map) => Ok(map),
            Err(PlrError::ParseError(msg)) if self.backup_path.exists() => {
                warn!(error = %msg, "Variables file corrupt, reading backup");
                self.read_map(&self.backup_path)
            }
            Err(e) => Err(e),
        }
    }

    fn read_map(&self, path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let file = File::open(path).map_err(|e| PlrError::io("opening variables file", e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PlrError::ParseError(format!("Invalid variables file: {e}")))
    }

    fn write(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if self.path.exists() {
            fs::copy(&self.path, &self.backup_path)
                .map_err(|e| PlrError::io("backing up variables file", e))?;
        }

        {
            let file = File::create(&self.temp_path)
                .map_err(|e| PlrError::io("creating temp variables file", e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, map)
                .map_err(|e| PlrError::Internal(format!("Serializing variables: {e}")))?;
            writer
                .flush()
                .map_err(|e| PlrError::io("flushing temp variables file", e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| PlrError::io("syncing temp variables file", e))?;
        }

        // Atomic rename
        fs::rename(&self.temp_path, &self.path)
            .map_err(|e| PlrError::io("renaming variables file", e))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PlrError::Internal("Variables lock poisoned".to_string()))?;
        let mut map = self.load()?;
        map.insert(key.to_string(), value.to_string());
        self.write(&map)?;
        debug!(key, "Variable saved");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PlrError::Internal("Variables lock poisoned".to_string()))?;
        Ok(self.load()?.remove(key))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .map_err(|_| PlrError::Internal("Memory store lock poisoned".to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .map_err(|_| PlrError::Internal("Memory store lock poisoned".to_string()))?
            .get(key)
            .cloned())
    }
}

/// Typed access to the checkpoint slot and calibration keys.
pub struct CheckpointStore<S: ?Sized> {
    store: std::sync::Arc<S>,
}

impl<S: ?Sized> Clone for CheckpointStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: std::sync::Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore + ?Sized> CheckpointStore<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }

    /// Overwrite the checkpoint slot.
    pub fn save(&self, checkpoint: &PersistedCheckpoint) -> Result<()> {
        let json = serde_json::to_string(checkpoint)
            .map_err(|e| PlrError::Internal(format!("Serializing checkpoint: {e}")))?;
        self.store.put(CHECKPOINT_KEY, &json)
    }

    /// Read the checkpoint slot.
    ///
    /// B_i(slot holds a valid checkpoint) → Ok(Some); empty or invalid → Ok(None).
    pub fn load(&self, validator: &SnapshotValidator) -> Result<Option<PersistedCheckpoint>> {
        let Some(raw) = self.store.get(CHECKPOINT_KEY)? else {
            debug!("No saved checkpoint");
            return Ok(None);
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Saved checkpoint is not valid JSON");
                return Ok(None);
            }
        };

        if value.as_object().is_some_and(|o| o.is_empty()) {
            debug!("Checkpoint slot is cleared");
            return Ok(None);
        }

        if let Err(e) = validator.validate_value(&value) {
            warn!(error = %e, "Invalid saved checkpoint");
            return Ok(None);
        }

        match serde_json::from_value(value) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(error = %e, "Saved checkpoint has unexpected shape");
                Ok(None)
            }
        }
    }

    /// Clear the checkpoint slot.
    pub fn clear(&self) -> Result<()> {
        self.store.put(CHECKPOINT_KEY, "{}")?;
        info!("Saved checkpoint cleared");
        Ok(())
    }

    pub fn save_z_offset(&self, stepper: &str, z: f64) -> Result<()> {
        self.store.put(&z_offset_key(stepper), &z.to_string())
    }

    /// Calibrated Z height, if one was stored and parses.
    pub fn load_z_offset(&self, stepper: &str) -> Result<Option<f64>> {
        let key = z_offset_key(stepper);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        match raw.trim().parse::<f64>() {
            Ok(z) => Ok(Some(z)),
            Err(e) => {
                warn!(key = %key, value = %raw, error = %e, "Stored Z offset does not parse");
                Ok(None)
            }
        }
    }

    pub fn save_mesh_profile(&self, profile: &str) -> Result<()> {
        let json = serde_json::to_string(profile)
            .map_err(|e| PlrError::Internal(format!("Serializing mesh profile: {e}")))?;
        self.store.put(MESH_PROFILE_KEY, &json)
    }

    /// Saved mesh profile name, unquoted. Empty names read as `None`.
    pub fn load_mesh_profile(&self) -> Result<Option<String>> {
        let Some(raw) = self.store.get(MESH_PROFILE_KEY)? else {
            return Ok(None);
        };
        let name = serde_json::from_str::<String>(&raw)
            .unwrap_or_else(|_| raw.trim().trim_matches('"').to_string());
        Ok(Some(name).filter(|n| !n.is_empty()))
    }
}
