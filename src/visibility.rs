//! Visibility evaluation
//!
//! Decides per widget whether it renders under the current telemetry and
//! profile. The decision fails closed: no sensor data means nothing
//! renders, and an `if` expression that does not evaluate hides its
//! widget rather than breaking the pass.

use crate::document::Widget;
use crate::expr;
use crate::sensors::SensorData;
use crate::vars;
use tracing::warn;

/// Profile name matching every widget without a declared profile type
pub const PROFILE_ANY: &str = "*";
pub const PROFILE_DESKTOP: &str = "desktop";
pub const PROFILE_GAME: &str = "game";
pub const PROFILE_STEAM: &str = "steam";

fn condition_holds(widget: &Widget, data: &SensorData) -> bool {
    let Some(expr_src) = &widget.condition else {
        return true;
    };
    let substituted = vars::resolve_sensor_values(expr_src, Some(data));
    match expr::eval_bool(&substituted) {
        Ok(result) => result,
        Err(err) => {
            warn!(
                widget = widget.id.as_str(),
                expression = expr_src.as_str(),
                "error evaluating condition: {}",
                err
            );
            false
        }
    }
}

fn has_profile(profile_type: &str, custom_profile: Option<&str>) -> bool {
    match custom_profile {
        Some(current) => !current.is_empty() && current == profile_type,
        None => false,
    }
}

/// Decide whether a widget renders.
///
/// `profile` is the active rendering profile (`*`, `desktop` or `game`);
/// `custom_profile` carries the current custom profile name (the foreground
/// game process) used as the fallback match for widget profile types that
/// are not one of the built-ins.
pub fn should_render(
    widget: &Widget,
    data: Option<&SensorData>,
    profile: &str,
    custom_profile: Option<&str>,
) -> bool {
    let Some(data) = data else {
        return false;
    };

    if !condition_holds(widget, data) {
        return false;
    }

    let profile_type = widget.profile_type.as_deref();
    let untyped = profile_type.is_none();

    if profile == PROFILE_ANY && untyped {
        return true;
    }

    if profile == PROFILE_DESKTOP
        && data.is_desktop()
        && (untyped || profile_type == Some(PROFILE_DESKTOP))
    {
        return true;
    }

    // steam widgets follow the steam flag regardless of the active profile
    if profile_type == Some(PROFILE_STEAM) {
        return data.is_steam();
    }

    if profile == PROFILE_GAME && profile_type != Some(PROFILE_DESKTOP) && data.is_game() {
        if untyped || profile_type == Some(PROFILE_GAME) {
            return true;
        }
        if has_profile(profile_type.unwrap_or(""), custom_profile) {
            return true;
        }
    }

    untyped || has_profile(profile_type.unwrap_or(""), custom_profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{GAME_PROCESS_SENSOR, STEAM_APP_SENSOR, SensorReading};

    fn widget(profile_type: Option<&str>, condition: Option<&str>) -> Widget {
        let mut json = serde_json::json!({"uri": "a.png"});
        if let Some(pt) = profile_type {
            json["profileType"] = serde_json::json!(pt);
        }
        if let Some(cond) = condition {
            json["if"] = serde_json::json!(cond);
        }
        serde_json::from_value(json).unwrap()
    }

    fn telemetry(game: &str, steam: &str) -> SensorData {
        let mut data = SensorData::default();
        for (id, value) in [(GAME_PROCESS_SENSOR, game), (STEAM_APP_SENSOR, steam)] {
            data.sensors.insert(
                id.to_string(),
                SensorReading {
                    value: value.to_string(),
                    ..Default::default()
                },
            );
        }
        data.sensors.insert(
            "cpu=>load".to_string(),
            SensorReading {
                value: "60".to_string(),
                value_raw: 60.0,
                ..Default::default()
            },
        );
        data
    }

    #[test]
    fn test_fails_closed_without_sensor_data() {
        let w = widget(None, None);
        assert!(!should_render(&w, None, PROFILE_ANY, None));
        assert!(!should_render(&w, None, PROFILE_DESKTOP, None));
    }

    #[test]
    fn test_untyped_widget_renders_under_any_profile() {
        let w = widget(None, None);
        let desktop = telemetry("", "0");
        let game = telemetry("doom.exe", "0");
        assert!(should_render(&w, Some(&desktop), PROFILE_ANY, None));
        assert!(should_render(&w, Some(&game), PROFILE_ANY, None));
    }

    #[test]
    fn test_desktop_profile_requires_no_game_running() {
        let w = widget(None, None);
        assert!(should_render(
            &w,
            Some(&telemetry("", "0")),
            PROFILE_DESKTOP,
            None
        ));
        // a game is running: fall through the desktop rule, render by the
        // untyped fallback
        let desktop_only = widget(Some("desktop"), None);
        assert!(!should_render(
            &desktop_only,
            Some(&telemetry("doom.exe", "0")),
            PROFILE_GAME,
            Some("doom.exe")
        ));
    }

    #[test]
    fn test_game_profile() {
        let w = widget(Some("game"), None);
        assert!(should_render(
            &w,
            Some(&telemetry("doom.exe", "0")),
            PROFILE_GAME,
            Some("doom.exe")
        ));
        assert!(!should_render(
            &w,
            Some(&telemetry("", "0")),
            PROFILE_DESKTOP,
            None
        ));
    }

    #[test]
    fn test_steam_overrides_profile() {
        let w = widget(Some("steam"), None);
        assert!(should_render(
            &w,
            Some(&telemetry("", "440")),
            PROFILE_DESKTOP,
            None
        ));
        assert!(!should_render(
            &w,
            Some(&telemetry("", "0")),
            PROFILE_DESKTOP,
            None
        ));
    }

    #[test]
    fn test_custom_profile_fallback() {
        let w = widget(Some("doom.exe"), None);
        assert!(should_render(
            &w,
            Some(&telemetry("doom.exe", "0")),
            PROFILE_GAME,
            Some("doom.exe")
        ));
        assert!(!should_render(
            &w,
            Some(&telemetry("hl2.exe", "0")),
            PROFILE_GAME,
            Some("hl2.exe")
        ));
    }

    #[test]
    fn test_condition_gates_rendering() {
        let visible = widget(None, Some("$[cpu=>load] > 50"));
        let hidden = widget(None, Some("$[cpu=>load] > 90"));
        let data = telemetry("", "0");
        assert!(should_render(&visible, Some(&data), PROFILE_ANY, None));
        assert!(!should_render(&hidden, Some(&data), PROFILE_ANY, None));
    }

    #[test]
    fn test_condition_error_hides_widget() {
        let broken = widget(None, Some("$[cpu=>load] >"));
        let data = telemetry("", "0");
        assert!(!should_render(&broken, Some(&data), PROFILE_ANY, None));
    }
}
