//! Persistence layer for process and per-device state
//!
//! One JSON file holds everything that must survive a restart: the cloud
//! session token, the day marker for the daily rollover, the last seen
//! error-log id and the per-device metric baselines. Losing the file is
//! harmless; the daily counters simply restart from zero.

use crate::error::Result;
use crate::logging::get_logger;
use crate::metrics::PersistentDeviceState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Process-wide persistent state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessState {
    /// Cloud session token shared by all devices of the account
    pub auth_token: String,

    /// Day of month of the last completed poll, drives the daily rollover
    /// (0 = never polled)
    pub day_today: u32,

    /// Id of the newest error-log entry already relayed
    pub last_error_id: String,

    /// Per-device metric baselines keyed by serial number
    pub devices: HashMap<String, PersistentDeviceState>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            day_today: 0,
            last_error_id: String::new(),
            devices: HashMap::new(),
        }
    }
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: String,
    pub state: ProcessState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            state: ProcessState::default(),
            logger: get_logger("persistence"),
        }
    }

    /// Load state from disk. A missing file is not an error; a corrupt
    /// file resets to defaults so one bad write cannot wedge the bridge.
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);
        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        match serde_json::from_str(&contents) {
            Ok(state) => {
                self.state = state;
                self.logger.info("Loaded persistent state from disk");
            }
            Err(e) => {
                self.logger.warn(&format!(
                    "Persistent state file is corrupt ({}), resetting to defaults",
                    e
                ));
                self.state = ProcessState::default();
            }
        }
        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");
        Ok(())
    }

    /// Per-device record, created on first access
    pub fn device_state(&mut self, serial: &str) -> &mut PersistentDeviceState {
        self.state
            .devices
            .entry(serial.to_string())
            .or_default()
    }
}
