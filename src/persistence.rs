//! Persistence of the energy counters
//!
//! A single JSON record holds the three counters. Writes go to a sibling
//! temporary file which is then renamed over the record, so a crash never
//! leaves a half-written file behind. A missing, corrupt or foreign record
//! is never fatal: the bridge starts from zero and says so in the log.

use crate::accumulator::AccumulatorState;
use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Version of the on-disk record layout
pub const SCHEMA_VERSION: u32 = 1;

/// Persistent state structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    pub schema_version: u32,
    /// Daily PV-AC counter; carries the day marker
    pub pv: AccumulatorState,
    /// Lifetime counter of AC leg L2
    #[serde(default)]
    pub l2: AccumulatorState,
    /// Lifetime counter of AC leg L3
    #[serde(default)]
    pub l3: AccumulatorState,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            pv: AccumulatorState::default(),
            l2: AccumulatorState::default(),
            l3: AccumulatorState::default(),
        }
    }
}

/// Reads and writes the counter record
pub struct StateStore {
    file_path: PathBuf,
    logger: StructuredLogger,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            logger: get_logger("persistence"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Load state from disk, falling back to zero counters
    pub fn load(&self) -> PersistentState {
        match self.try_load() {
            Ok(Some(state)) => {
                self.logger.info(&format!(
                    "Loaded persistent state from {} (pv={:.3} Wh, day={:?})",
                    self.file_path.display(),
                    state.pv.energy_wh,
                    state.pv.day
                ));
                state
            }
            Ok(None) => {
                self.logger
                    .info("No persistent state file found, starting from zero");
                PersistentState::default()
            }
            Err(e) => {
                self.logger.warn(&format!(
                    "Ignoring unusable state file {}: {}",
                    self.file_path.display(),
                    e
                ));
                PersistentState::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<PersistentState>> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.file_path)?;
        let state: PersistentState = serde_json::from_str(&contents)?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(BridgeError::validation(
                "schema_version".to_string(),
                format!(
                    "found {}, expected {}",
                    state.schema_version, SCHEMA_VERSION
                ),
            ));
        }
        Ok(Some(PersistentState {
            schema_version: SCHEMA_VERSION,
            pv: state.pv.sanitized(),
            l2: state.l2.sanitized(),
            l3: state.l3.sanitized(),
        }))
    }

    /// Save state to disk atomically
    pub fn save(&self, state: &PersistentState) -> Result<()> {
        if let Some(dir) = self.file_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let tmp_path = self.tmp_path();
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.file_path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            BridgeError::io(format!(
                "Failed to replace {}: {}",
                self.file_path.display(),
                e
            ))
        })?;
        self.logger.trace("Saved persistent state to disk");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .file_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.file_path.with_file_name(name)
    }
}
