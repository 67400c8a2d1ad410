//! Sensor telemetry model
//!
//! Telemetry arrives as an opaque map of sensor readings and is replaced
//! wholesale on every push. The rendering mode (desktop vs game) and the
//! steam flag are derived from well-known sensor ids each time the data
//! changes; nothing is cached between pushes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sensor reporting the foreground game process name (empty = no game)
pub const GAME_PROCESS_SENSOR: &str = "rtss=>process";

/// Sensor reporting the running steam app id
pub const STEAM_APP_SENSOR: &str = "steam=>app";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SensorReading {
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "valueRaw")]
    pub value_raw: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SensorData {
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorReading>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Rendering mode derived from the game-process sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Desktop,
    Game,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Desktop => "desktop",
            Mode::Game => "game",
        }
    }
}

impl SensorData {
    /// Display value of a sensor, if present
    pub fn value(&self, id: &str) -> Option<&str> {
        self.sensors.get(id).map(|s| s.value.as_str())
    }

    /// Raw numeric value of a sensor, if present
    pub fn value_raw(&self, id: &str) -> Option<f64> {
        self.sensors.get(id).map(|s| s.value_raw)
    }

    /// Name of the foreground game process; empty when no game runs
    pub fn game_process(&self) -> &str {
        self.value(GAME_PROCESS_SENSOR).unwrap_or("")
    }

    pub fn is_desktop(&self) -> bool {
        self.game_process().is_empty()
    }

    pub fn is_game(&self) -> bool {
        !self.game_process().is_empty()
    }

    /// Steam is a separate flag, independent of the desktop/game mode
    pub fn is_steam(&self) -> bool {
        self.value(STEAM_APP_SENSOR)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| v > 0.0)
            .unwrap_or(false)
    }

    pub fn mode(&self) -> Mode {
        if self.is_game() { Mode::Game } else { Mode::Desktop }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn sample(game: &str, steam: &str) -> SensorData {
        serde_json::from_value(serde_json::json!({
            "sensors": {
                GAME_PROCESS_SENSOR: { "value": game, "valueRaw": 0.0 },
                STEAM_APP_SENSOR: { "value": steam, "valueRaw": 0.0 },
                "cpu=>load": { "value": "42 %", "valueRaw": 42.5 },
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_mode_from_game_sensor() {
        assert_eq!(sample("", "0").mode(), Mode::Desktop);
        assert_eq!(sample("doom.exe", "0").mode(), Mode::Game);
    }

    #[test]
    fn test_steam_flag_is_numeric() {
        assert!(sample("", "440").is_steam());
        assert!(!sample("", "0").is_steam());
        assert!(!sample("", "").is_steam());
    }

    #[test]
    fn test_missing_sensors_read_as_desktop() {
        let data = SensorData::default();
        assert!(data.is_desktop());
        assert!(!data.is_steam());
        assert_eq!(data.value_raw("cpu=>load"), None);
    }

    #[test]
    fn test_extra_fields_tolerated() {
        let data: SensorData = serde_json::from_str(
            r#"{"sensors":{"cpu=>load":{"value":"1","valueRaw":1.0,"unit":"%"}},"ts":123}"#,
        )
        .unwrap();
        assert_eq!(data.value_raw("cpu=>load"), Some(1.0));
    }
}
