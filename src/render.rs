//! Render diff engine
//!
//! Turns the visible widget subset into overlay markup and decides whether
//! anything actually changed. The encoded markup is fingerprinted against
//! the previous pass; an identical fingerprint means no surface swap and no
//! refresh-timer churn, so a telemetry push that changes nothing visible
//! never causes a flicker or a media reload.

pub mod markup;
pub mod refresh;

use crate::document::{WidgetDocument, WidgetKind};
use crate::sensors::SensorData;
use crate::visibility;
use refresh::{MediaElement, deactivate_all};
use std::collections::BTreeMap;
use tracing::debug;

/// Initial z-index of a render pass; widgets stack upward in steps of 10
const BASE_Z_INDEX: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderResult {
    pub changed: bool,
}

/// Per-surface render state: the live markup, its fingerprint, and the
/// media elements scheduled for refresh
#[derive(Debug, Default)]
pub struct RenderState {
    host: String,
    fingerprint: Option<String>,
    pub html: String,
    pub elements: Vec<MediaElement>,
    /// Buttons panel payloads keyed by widget id, forwarded to the
    /// buttons surface after a swap
    pub buttons: BTreeMap<String, String>,
}

impl RenderState {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }
}

/// Render the widgets visible on `screen` under the given profile.
///
/// When the pass produces the same fingerprint as the previous one the
/// state is left untouched and `changed` is false. Otherwise the previous
/// element set is deactivated and replaced; the caller hands the new
/// `state.elements` to the refresh scheduler.
pub fn render(
    state: &mut RenderState,
    document: &WidgetDocument,
    data: Option<&SensorData>,
    screen: i64,
    profile: &str,
    custom_profile: Option<&str>,
) -> RenderResult {
    let mut z_counter = BASE_Z_INDEX;
    let mut html = String::new();
    let mut elements: Vec<MediaElement> = Vec::new();
    let mut buttons: BTreeMap<String, String> = BTreeMap::new();

    for widget in &document.widgets {
        if !widget.enabled || widget.screen != screen {
            continue;
        }
        if !visibility::should_render(widget, data, profile, custom_profile) {
            continue;
        }
        if widget.uri.is_empty() {
            debug!(widget = widget.id.as_str(), "widget has no uri, skipping");
            continue;
        }

        match widget.kind {
            WidgetKind::Video => {
                html.push_str(&markup::video_tag(widget, &state.host, &mut z_counter));
                elements.push(MediaElement::video(
                    &widget.id,
                    widget.playback_rate.clone(),
                    widget.update.unwrap_or(0),
                ));
            }
            WidgetKind::YouTube { share } => {
                html.push_str(&markup::youtube_tag(widget, share));
            }
            WidgetKind::ButtonsPanel => {
                let (tag, payload) = markup::buttons_tag(widget);
                buttons.insert(widget.id.clone(), payload);
                html.push_str(&tag);
            }
            WidgetKind::Image => {
                let (tag, uri) = markup::image_tag(widget, &state.host, data, &mut z_counter);
                html.push_str(&tag);
                elements.push(MediaElement::image(
                    &widget.id,
                    &uri,
                    widget.update.unwrap_or(0),
                ));
            }
        }
    }

    let encoded = markup::encode_html(&html);
    if state.fingerprint.as_deref() == Some(encoded.as_str()) {
        debug!(screen, profile, "no widget changes");
        return RenderResult { changed: false };
    }

    deactivate_all(&state.elements);
    state.fingerprint = Some(encoded);
    state.html = html;
    state.elements = elements;
    state.buttons = buttons;
    RenderResult { changed: true }
}
