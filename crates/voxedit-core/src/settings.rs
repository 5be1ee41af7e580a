use serde::{Deserialize, Serialize};

use crate::error::{EditError, Result};
use crate::pattern::PlacementPattern;

pub const DEFAULT_UNDO_THRESHOLD: usize = 60;
pub const DEFAULT_MIN_UNDO_STATES: usize = 30;

/// Bounds on the undo history.
///
/// When the undo stack grows past `undo_threshold`, everything but the
/// newest `min_undo_states` diffs is folded into the base state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub undo_threshold: usize,
    pub min_undo_states: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            undo_threshold: DEFAULT_UNDO_THRESHOLD,
            min_undo_states: DEFAULT_MIN_UNDO_STATES,
        }
    }
}

impl HistoryConfig {
    pub fn new(undo_threshold: usize, min_undo_states: usize) -> Result<Self> {
        let config = Self {
            undo_threshold,
            min_undo_states,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_undo_states == 0 {
            return Err(EditError::InvalidConfig(
                "min_undo_states must be at least 1".to_string(),
            ));
        }
        if self.min_undo_states >= self.undo_threshold {
            return Err(EditError::InvalidConfig(format!(
                "min_undo_states ({}) must be below undo_threshold ({})",
                self.min_undo_states, self.undo_threshold
            )));
        }
        Ok(())
    }
}

/// Per-session editor settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub history: HistoryConfig,
    pub default_pattern: PlacementPattern,
}

impl SessionSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| EditError::InvalidConfig(e.to_string()))?;
        settings.history.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
