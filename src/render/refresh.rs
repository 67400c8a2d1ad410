//! Media refresh scheduling
//!
//! Rendered images and videos carry a per-widget refresh interval. Each
//! scheduled element owns an active flag; stopping a refresh clears the
//! flag and the timer task notices on its next tick and exits. Flags are
//! per element, so a tick from a replaced render pass can never act on an
//! element from the current one.

use crate::sensors::SensorData;
use crate::vars;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Playback never drops below this rate; a stalled formula must not
/// freeze the video
pub const MIN_PLAYBACK_RATE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum MediaKind {
    Image {
        source: String,
    },
    Video {
        playback_rate: Option<String>,
        static_rate: f64,
    },
}

/// A rendered element subject to periodic refresh
#[derive(Debug, Clone)]
pub struct MediaElement {
    pub id: String,
    pub update_ms: u64,
    pub kind: MediaKind,
    active: Arc<AtomicBool>,
}

impl MediaElement {
    pub fn image(id: &str, source: &str, update_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            update_ms,
            kind: MediaKind::Image {
                source: source.to_string(),
            },
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn video(id: &str, playback_rate: Option<String>, update_ms: u64) -> Self {
        Self {
            id: id.to_string(),
            update_ms,
            kind: MediaKind::Video {
                playback_rate,
                static_rate: 1.0,
            },
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Stop every element of a render pass; running timers self-terminate on
/// their next tick
pub fn deactivate_all(elements: &[MediaElement]) {
    for element in elements {
        element.deactivate();
    }
}

/// Compute the playback rate from a formula and current telemetry,
/// clamped to the minimum. Errors fall back to normal speed.
pub fn playback_rate(formula: &str, data: Option<&SensorData>) -> f64 {
    let Some(data) = data else {
        return 1.0;
    };
    let rate = match vars::resolve_numeric(formula, data) {
        Ok(rate) => rate,
        Err(err) => {
            warn!(formula, "error evaluating playback rate: {}", err);
            1.0
        }
    };
    if rate < MIN_PLAYBACK_RATE {
        MIN_PLAYBACK_RATE
    } else {
        rate
    }
}

/// Cache-busting source rewrite for an image refresh
pub fn cache_busted(source: &str) -> String {
    format!("{}&t={}", source, jiff::Timestamp::now().as_millisecond())
}

/// A refresh effect for the overlay surface to apply
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshUpdate {
    ImageSource { id: String, src: String },
    PlaybackRate { id: String, rate: f64 },
}

/// Drives refresh timers for the current element set. Updates are
/// delivered over a channel to whatever owns the rendered surface.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<RefreshUpdate>,
    sensors: Arc<RwLock<Option<SensorData>>>,
}

impl Scheduler {
    pub fn new(
        sensors: Arc<RwLock<Option<SensorData>>>,
    ) -> (Self, mpsc::UnboundedReceiver<RefreshUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, sensors }, rx)
    }

    fn current_sensors(&self) -> Option<SensorData> {
        self.sensors.read().ok().and_then(|data| data.clone())
    }

    /// Start timers for a freshly rendered element set
    pub fn start(&self, elements: &[MediaElement]) {
        for element in elements {
            match &element.kind {
                MediaKind::Video {
                    playback_rate: Some(formula),
                    ..
                } if element.update_ms > 0 => {
                    self.spawn_video_loop(element, formula.clone());
                }
                MediaKind::Video {
                    playback_rate: None,
                    static_rate,
                } => {
                    // no formula: the rate is applied once and left alone
                    let _ = self.tx.send(RefreshUpdate::PlaybackRate {
                        id: element.id.clone(),
                        rate: *static_rate,
                    });
                }
                MediaKind::Image { source } if element.update_ms > 0 => {
                    self.spawn_image_loop(element, source.clone());
                }
                _ => {}
            }
        }
    }

    /// Stop timers; each task observes its own element's flag
    pub fn stop(&self, elements: &[MediaElement]) {
        deactivate_all(elements);
    }

    fn spawn_video_loop(&self, element: &MediaElement, formula: String) {
        let id = element.id.clone();
        let interval = Duration::from_millis(element.update_ms);
        let active = Arc::clone(&element.active);
        let tx = self.tx.clone();
        let scheduler = self.clone();

        tokio::spawn(async move {
            // the first rate applies immediately, then on every interval
            loop {
                if !active.load(Ordering::Acquire) {
                    debug!(id = %id, "video refresh stopped");
                    break;
                }
                let data = scheduler.current_sensors();
                let rate = playback_rate(&formula, data.as_ref());
                if tx
                    .send(RefreshUpdate::PlaybackRate {
                        id: id.clone(),
                        rate,
                    })
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    fn spawn_image_loop(&self, element: &MediaElement, source: String) {
        let id = element.id.clone();
        let interval = Duration::from_millis(element.update_ms);
        let active = Arc::clone(&element.active);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !active.load(Ordering::Acquire) {
                    debug!(id = %id, "image refresh stopped");
                    break;
                }
                // a failed load retries on the same cadence, so the tick
                // fires regardless of the previous request's outcome
                if tx
                    .send(RefreshUpdate::ImageSource {
                        id: id.clone(),
                        src: cache_busted(&source),
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorReading;

    fn telemetry(raw: f64) -> SensorData {
        let mut data = SensorData::default();
        data.sensors.insert(
            "0".to_string(),
            SensorReading {
                value: raw.to_string(),
                value_raw: raw,
                ..Default::default()
            },
        );
        data
    }

    #[test]
    fn test_playback_rate_formula() {
        let data = telemetry(50.0);
        assert_eq!(playback_rate("100.0/sensor=0", Some(&data)), 2.0);
    }

    #[test]
    fn test_playback_rate_clamps_to_floor() {
        let data = telemetry(10_000.0);
        assert_eq!(playback_rate("100.0/sensor=0", Some(&data)), MIN_PLAYBACK_RATE);
    }

    #[test]
    fn test_playback_rate_defaults_without_telemetry_or_on_error() {
        assert_eq!(playback_rate("100.0/sensor=0", None), 1.0);
        let data = telemetry(50.0);
        assert_eq!(playback_rate("not a formula", Some(&data)), 1.0);
    }

    #[test]
    fn test_cache_busted_appends_timestamp() {
        let src = cache_busted("gauge?sensor=3");
        assert!(src.starts_with("gauge?sensor=3&t="));
        let ts: i64 = src.rsplit_once("&t=").unwrap().1.parse().unwrap();
        assert!(ts > 0);
    }

    #[test]
    fn test_deactivate_is_per_element() {
        let first = MediaElement::image("a", "a.png", 1000);
        let second = MediaElement::image("b", "b.png", 1000);
        first.deactivate();
        assert!(!first.is_active());
        assert!(second.is_active());
    }

    #[tokio::test]
    async fn test_image_loop_ticks_until_stopped() {
        let sensors = Arc::new(RwLock::new(None));
        let (scheduler, mut rx) = Scheduler::new(sensors);
        let element = MediaElement::image("img", "cam.jpg?size=1", 10);

        scheduler.start(std::slice::from_ref(&element));
        let update = rx.recv().await.unwrap();
        match update {
            RefreshUpdate::ImageSource { id, src } => {
                assert_eq!(id, "img");
                assert!(src.starts_with("cam.jpg?size=1&t="));
            }
            other => panic!("unexpected update: {:?}", other),
        }

        scheduler.stop(std::slice::from_ref(&element));
        assert!(!element.is_active());
    }

    #[tokio::test]
    async fn test_video_loop_reports_clamped_rate() {
        let sensors = Arc::new(RwLock::new(Some(telemetry(1_000_000.0))));
        let (scheduler, mut rx) = Scheduler::new(sensors);
        let element = MediaElement::video("vid", Some("100.0/sensor=0".to_string()), 10);

        scheduler.start(std::slice::from_ref(&element));
        match rx.recv().await.unwrap() {
            RefreshUpdate::PlaybackRate { id, rate } => {
                assert_eq!(id, "vid");
                assert_eq!(rate, MIN_PLAYBACK_RATE);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        scheduler.stop(std::slice::from_ref(&element));
    }

    #[tokio::test]
    async fn test_static_video_rate_applied_once() {
        let sensors = Arc::new(RwLock::new(None));
        let (scheduler, mut rx) = Scheduler::new(sensors);
        let element = MediaElement::video("vid", None, 0);

        scheduler.start(std::slice::from_ref(&element));
        assert_eq!(
            rx.recv().await.unwrap(),
            RefreshUpdate::PlaybackRate {
                id: "vid".to_string(),
                rate: 1.0
            }
        );
        // nothing further is scheduled for a static-rate video
        assert!(rx.try_recv().is_err());
    }
}
