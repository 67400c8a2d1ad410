//! Markup generation
//!
//! One generator per widget kind, producing the HTML fragment the overlay
//! surface displays. The concatenated fragment, HTML-entity encoded, is the
//! fingerprint the diff engine compares between passes.

use crate::document::{Position, Widget};
use crate::sensors::SensorData;
use crate::vars;

/// Entity-encode markup; equality of the encoded form is the change signal
pub fn encode_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
        .replace('"', "&#34;")
}

/// Signed 32-bit string hash used to version a buttons panel's payload
pub fn hash_code(s: &str) -> i32 {
    let mut h: i32 = 0;
    for unit in s.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    h
}

/// Position CSS for a widget. Widgets without an explicit `z` take the
/// next slot from the pass counter; the counter advances either way.
pub fn pos_css(position: &Position, z_counter: &mut i64) -> String {
    let x = position.x.as_deref().unwrap_or("0");
    let y = position.y.as_deref().unwrap_or("0");
    let w = position.w.as_deref().unwrap_or("0");
    let h = position.h.as_deref().unwrap_or("0");
    let z = position.z.unwrap_or(*z_counter);

    let mut css = format!("position:absolute;left:{};top:{};", x, y);
    if w != "0" {
        css.push_str(&format!("width:{};", w));
        css.push_str(&format!("height:{};", h));
    }
    css.push_str(&format!("z-index:{};", z));
    *z_counter += 10;
    css
}

fn opacity_css(widget: &Widget) -> String {
    match widget.opacity {
        Some(opacity) => format!("opacity:{};", opacity),
        None => String::new(),
    }
}

pub fn video_tag(widget: &Widget, host: &str, z_counter: &mut i64) -> String {
    let uri = format!("//{}/{}", host, widget.uri);
    let update = widget.update.unwrap_or(0);
    let rate_attr = match &widget.playback_rate {
        Some(formula) => format!(" playback-rate=\"{}\"", formula),
        None => String::new(),
    };
    format!(
        "<div class=\"dragabble\" id=\"{}\" style=\"{}\">\
         <video preload=true playsinline autoplay muted=true loop=true class=\"fsvideo\" update-interval=\"{}\"{}>\
         <source src=\"{}\" type=\"video/mp4\"></video></div>",
        widget.id,
        pos_css(&widget.position, z_counter),
        update,
        rate_attr,
        uri
    )
}

fn youtube_url(uri: &str, share: bool) -> String {
    if !share {
        return uri.replace("/watch?v=", "/embed/");
    }
    let tail = uri.rfind('/').map(|i| &uri[i..]).unwrap_or(uri);
    format!("https://www.youtube.com/embed{}", tail)
}

pub fn youtube_tag(widget: &Widget, share: bool) -> String {
    format!(
        "<div class=\"video-wrapper\">\
         <iframe src=\"{}?controls=0&amp;autoplay=1&amp;html5=1&amp;mute=1&amp;loop=1\" frameborder=\"0\" \
         allow=\"autoplay; encrypted-media;\" allowfullscreen></iframe></div>",
        youtube_url(&widget.uri, share)
    )
}

/// Image markup. Sensor placeholders in the URI resolve now, so the
/// returned source is also what the refresh scheduler re-requests.
pub fn image_tag(
    widget: &Widget,
    host: &str,
    data: Option<&SensorData>,
    z_counter: &mut i64,
) -> (String, String) {
    let resolved = vars::resolve_sensor_values(&widget.uri, data);
    let uri = if resolved.contains("http") {
        format!(
            "//{}/cache?uri={}",
            host,
            vars::encode_uri_component(&resolved)
        )
    } else {
        format!("//{}/{}", host, resolved)
    };
    let update = widget.update.unwrap_or(0);
    let tag = format!(
        "<img class=\"dragabble\" id=\"{}\" src=\"{}\" style=\"{}{}\" update-interval=\"{}\">",
        widget.id,
        uri,
        pos_css(&widget.position, z_counter),
        opacity_css(widget),
        update
    );
    (tag, uri)
}

/// Buttons panel markup. The panel payload is serialized and hashed into
/// the frame URL so the buttons surface reloads when its definition
/// changes. Returns the markup and the payload for the panel registry.
pub fn buttons_tag(widget: &Widget) -> (String, String) {
    let payload = widget
        .buttons
        .as_ref()
        .map(|b| serde_json::to_string(b).unwrap_or_default())
        .unwrap_or_default();
    let y = widget.position.y.as_deref().unwrap_or("0");
    let w = widget.position.w.as_deref().unwrap_or("0");
    let h = widget.position.h.as_deref().unwrap_or("0");
    let tag = format!(
        "<div class=\"buttons-wrapper dragabble\" id=\"{}\" style=\"top:{};position:absolute;\">\
         <iframe src=\"{}&id={}&h={}\" frameborder=\"0\" style=\"width:{};height:{}\"></iframe></div>",
        widget.id,
        y,
        widget.uri,
        widget.id,
        hash_code(&payload),
        w,
        h
    );
    (tag, payload)
}
