//! Widget document model
//!
//! The in-memory representation of a resolved layout: an ordered widget
//! list plus the variable-file names and constants collected during include
//! flattening. Documents are rebuilt wholesale on every activation; nothing
//! mutates a live document in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Widget kind, decided once from the URI when a document is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WidgetKind {
    #[default]
    Image,
    Video,
    YouTube {
        share: bool,
    },
    ButtonsPanel,
}

impl WidgetKind {
    /// Classify a widget URI. Anything unrecognized renders as an image.
    pub fn from_uri(uri: &str) -> Self {
        let lower = uri.to_ascii_lowercase();
        if lower.contains(".mp4") {
            WidgetKind::Video
        } else if lower.contains("youtube.com") {
            WidgetKind::YouTube { share: false }
        } else if lower.contains("youtu.be") {
            WidgetKind::YouTube { share: true }
        } else if uri.contains("buttons") {
            WidgetKind::ButtonsPanel
        } else {
            WidgetKind::Image
        }
    }
}

/// Widget position in CSS units. `z` is auto-assigned at render time when
/// absent and is never written back to layout files.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<i64>,
}

/// An `include` reference: a single fragment name or a list of them
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum IncludeRef {
    One(String),
    Many(Vec<String>),
}

fn default_enabled() -> bool {
    true
}

/// A positioned visual element of the overlay
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default)]
    pub screen: i64,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_type: Option<String>,
    /// Boolean expression gating visibility, evaluated against sensor data
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Media refresh interval in milliseconds (0 = no periodic refresh)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<u64>,
    /// Playback-rate formula for video widgets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<IncludeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Value>,
    /// Kind is derived from the URI at load time, not serialized
    #[serde(skip)]
    pub kind: WidgetKind,
    /// Fields this engine does not interpret survive a resolve round-trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Widget {
    pub fn classify(&mut self) {
        self.kind = WidgetKind::from_uri(&self.uri);
    }
}

/// A flattened widget layout
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WidgetDocument {
    #[serde(default)]
    pub widgets: Vec<Widget>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub vars: Vec<String>,
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl WidgetDocument {
    /// Deserialize a document and classify every widget
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let mut doc: WidgetDocument = serde_json::from_value(value)?;
        for widget in &mut doc.widgets {
            widget.classify();
        }
        Ok(doc)
    }
}

/// Layout files write `vars` as either a single name or a list
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(name) => vec![name],
        StringOrList::Many(names) => names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_uri() {
        assert_eq!(WidgetKind::from_uri("clips/lava.MP4"), WidgetKind::Video);
        assert_eq!(
            WidgetKind::from_uri("https://www.youtube.com/watch?v=abc"),
            WidgetKind::YouTube { share: false }
        );
        assert_eq!(
            WidgetKind::from_uri("https://youtu.be/abc"),
            WidgetKind::YouTube { share: true }
        );
        assert_eq!(
            WidgetKind::from_uri("buttons?buttons=%5B%5D"),
            WidgetKind::ButtonsPanel
        );
        assert_eq!(WidgetKind::from_uri("gauge?sensor=3"), WidgetKind::Image);
    }

    #[test]
    fn test_widget_defaults() {
        let widget: Widget = serde_json::from_str(r#"{"uri":"clock.png","screen":1}"#).unwrap();
        assert!(widget.enabled);
        assert_eq!(widget.screen, 1);
        assert!(widget.condition.is_none());
        assert!(widget.id.is_empty());
    }

    #[test]
    fn test_condition_reads_if_field() {
        let widget: Widget =
            serde_json::from_str(r#"{"uri":"a.png","if":"$[cpu=>load] > 50"}"#).unwrap();
        assert_eq!(widget.condition.as_deref(), Some("$[cpu=>load] > 50"));
    }

    #[test]
    fn test_vars_single_string_form() {
        let doc: WidgetDocument =
            serde_json::from_str(r#"{"widgets":[],"vars":"network"}"#).unwrap();
        assert_eq!(doc.vars, vec!["network".to_string()]);
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let doc = WidgetDocument::from_value(serde_json::json!({
            "widgets": [{"uri": "a.png", "note": "keep me"}],
        }))
        .unwrap();
        let out = serde_json::to_value(&doc).unwrap();
        assert_eq!(out["widgets"][0]["note"], "keep me");
    }
}
