use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command names used on the wire
pub mod cmd {
    pub const WIDGETS: &str = "widgets";
    pub const SENSOR_DATA: &str = "sensor-data";
    pub const BUTTONS_ACTION: &str = "buttons-action";
    pub const ACTIVATE_FILE: &str = "activate-file";
    pub const LOAD_WIDGET_DATA: &str = "load-widget-data";
    pub const SAVE_WIDGET_POS: &str = "save-widget-pos";
}

/// HTTP-style status codes carried in responses
pub mod status {
    pub const OK: u16 = 200;
    pub const NOT_MODIFIED: u16 = 304;
    pub const ERROR: u16 = 500;
}

/// Remote-button actions forwarded by the buttons surface
pub mod actions {
    pub const ACTIVATE_PROFILE: &str = "activateProfile";
    pub const START_PROGRAM: &str = "startProgram";
    pub const PLAY_SOUND: &str = "playSound";
}

/// Messages sent from clients to the server: `{ cmd, data }`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Request {
    pub fn new(cmd: &str) -> Self {
        Request {
            cmd: cmd.to_string(),
            data: None,
        }
    }

    pub fn with_data(cmd: &str, data: Value) -> Self {
        Request {
            cmd: cmd.to_string(),
            data: Some(data),
        }
    }
}

/// Messages sent from the server to clients: `{ cmd, result, data }`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub cmd: String,
    pub result: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// Create a 200 response carrying a payload
    pub fn ok(cmd: &str, data: Value) -> Self {
        Response {
            cmd: cmd.to_string(),
            result: status::OK,
            data: Some(data),
        }
    }

    /// Create a data-less status response
    pub fn with_status(cmd: &str, result: u16) -> Self {
        Response {
            cmd: cmd.to_string(),
            result,
            data: None,
        }
    }
}

/// Payload of `activate-file` and `load-widget-data`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileParams {
    pub filename: String,
}

/// A single remote-button action
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ButtonAction {
    pub action: String,
    #[serde(default)]
    pub data: ButtonActionData,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ButtonActionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The buttons surface sends either one action or a batch
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ButtonsRequest {
    Many(Vec<ButtonAction>),
    One(ButtonAction),
}

impl ButtonsRequest {
    pub fn into_actions(self) -> Vec<ButtonAction> {
        match self {
            ButtonsRequest::Many(actions) => actions,
            ButtonsRequest::One(action) => vec![action],
        }
    }
}

/// Payload of `save-widget-pos`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SavePosParams {
    pub id: String,
    pub pos: WidgetPos,
}

/// A widget position coming back from the drag editor; coordinates are
/// either pixel numbers or the literal string `auto`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WidgetPos {
    pub x: PosValue,
    pub y: PosValue,
    pub w: PosValue,
    pub h: PosValue,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum PosValue {
    Number(f64),
    Text(String),
}

impl PosValue {
    /// Render the value as stored in layout files (`auto` stays, numbers
    /// get a `px` suffix)
    pub fn to_css(&self) -> String {
        match self {
            PosValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}px", *n as i64)
                } else {
                    format!("{}px", n)
                }
            }
            PosValue::Text(s) => {
                if s == "auto" {
                    s.clone()
                } else {
                    format!("{}px", s)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = Request::new(cmd::WIDGETS);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"cmd":"widgets"}"#);

        let decoded: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.cmd, cmd::WIDGETS);
        assert!(decoded.data.is_none());
    }

    #[test]
    fn test_response_shape() {
        let response = Response::ok(cmd::WIDGETS, serde_json::json!({"widgets": []}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""result":200"#));
        assert!(json.contains(r#""cmd":"widgets""#));
    }

    #[test]
    fn test_buttons_request_single_and_batch() {
        let one: ButtonsRequest =
            serde_json::from_str(r#"{"action":"playSound","data":{"path":"ding.wav"}}"#).unwrap();
        assert_eq!(one.into_actions().len(), 1);

        let many: ButtonsRequest = serde_json::from_str(
            r#"[{"action":"activateProfile","data":{"profile":"night"}},{"action":"startProgram","data":{"path":"c:/tool.exe"}}]"#,
        )
        .unwrap();
        let actions = many.into_actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action, actions::ACTIVATE_PROFILE);
        assert_eq!(actions[0].data.profile.as_deref(), Some("night"));
    }

    #[test]
    fn test_pos_value_css() {
        let auto = PosValue::Text("auto".to_string());
        assert_eq!(auto.to_css(), "auto");

        let px = PosValue::Number(120.0);
        assert_eq!(px.to_css(), "120px");
    }
}
