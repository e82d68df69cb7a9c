//! Tunables for a cargo network.
//!
//! With the `data-loader` feature, a [`LedgerConfig`] can be read from JSON.
//! Missing fields take their defaults.

use crate::arena::DEFAULT_ARENA_CAPACITY;
use crate::fixed::Ticks;
use crate::unit::MAX_UNIT_COUNT;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[cfg(feature = "data-loader")]
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },
    #[error("max_unit_count {0} exceeds the per-unit limit {max}", max = MAX_UNIT_COUNT)]
    UnitCountTooLarge(u32),
}

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Most cargo units alive at once across the whole network.
    pub arena_capacity: usize,
    /// Largest unit a merge may produce.
    pub max_unit_count: u32,
    /// Station units re-routed per ledger per tick.
    pub rescan_window: usize,
    /// Ring buffer size per event kind.
    pub event_buffer_capacity: usize,
    /// Ticks per day of transit.
    pub day_length_ticks: Ticks,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            max_unit_count: MAX_UNIT_COUNT,
            rescan_window: 32,
            event_buffer_capacity: 1024,
            day_length_ticks: 74,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("arena_capacity", self.arena_capacity == 0),
            ("max_unit_count", self.max_unit_count == 0),
            ("rescan_window", self.rescan_window == 0),
            ("event_buffer_capacity", self.event_buffer_capacity == 0),
            ("day_length_ticks", self.day_length_ticks == 0),
        ];
        if let Some(&(field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Zero { field });
        }
        if self.max_unit_count > MAX_UNIT_COUNT {
            return Err(ConfigError::UnitCountTooLarge(self.max_unit_count));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse and validate a config from a JSON string.
#[cfg(feature = "data-loader")]
pub fn load_config_json(json: &str) -> Result<LedgerConfig, ConfigError> {
    let config: LedgerConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate a config from JSON bytes.
#[cfg(feature = "data-loader")]
pub fn load_config_json_bytes(bytes: &[u8]) -> Result<LedgerConfig, ConfigError> {
    let config: LedgerConfig = serde_json::from_slice(bytes)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arena_capacity, 1 << 20);
        assert_eq!(config.max_unit_count, 65535);
        assert_eq!(config.day_length_ticks, 74);
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = LedgerConfig {
            rescan_window: 0,
            ..LedgerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero { field: "rescan_window" })
        ));
    }

    #[test]
    fn oversized_units_are_rejected() {
        let config = LedgerConfig {
            max_unit_count: MAX_UNIT_COUNT + 1,
            ..LedgerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnitCountTooLarge(_))));
    }

    #[cfg(feature = "data-loader")]
    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = load_config_json(r#"{ "rescan_window": 8, "day_length_ticks": 10 }"#).unwrap();
        assert_eq!(config.rescan_window, 8);
        assert_eq!(config.day_length_ticks, 10);
        assert_eq!(config.arena_capacity, DEFAULT_ARENA_CAPACITY);
    }

    #[cfg(feature = "data-loader")]
    #[test]
    fn json_errors_surface() {
        assert!(matches!(load_config_json("{"), Err(ConfigError::JsonParse(_))));
        assert!(matches!(
            load_config_json(r#"{ "arena_capacity": 0 }"#),
            Err(ConfigError::Zero { field: "arena_capacity" })
        ));
        assert!(load_config_json_bytes(br#"{}"#).is_ok());
    }
}
