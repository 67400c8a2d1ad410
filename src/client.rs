//! Render client
//!
//! Connects to the layout server, keeps the flattened document and the
//! latest telemetry, and re-renders the overlay on every push. The markup
//! is written to the output file only when the render pass reports a
//! change; refresh updates from the scheduler patch media sources in
//! place. A lost connection is retried on a fixed 1 s cadence.

use crate::document::WidgetDocument;
use crate::protocol::{Request, Response, cmd};
use crate::render::refresh::{MediaKind, RefreshUpdate, Scheduler};
use crate::render::{self, RenderState};
use crate::sensors::SensorData;
use crate::socket::{RETRY_INTERVAL_MS, SocketError};
use crate::transport::AsyncConnection;
use crate::visibility::PROFILE_DESKTOP;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub host: String,
    pub port: u16,
    pub screen: i64,
    pub output: PathBuf,
}

/// Everything one render session owns: the document, telemetry, the
/// derived profile, and the rendered surface state
pub struct ClientRenderState {
    screen: i64,
    output: PathBuf,
    document: Option<WidgetDocument>,
    sensors: Arc<RwLock<Option<SensorData>>>,
    current_profile: Option<String>,
    render: RenderState,
    scheduler: Scheduler,
    /// Current media sources by element id, for in-place refresh rewrites
    sources: BTreeMap<String, String>,
}

impl ClientRenderState {
    pub fn new(
        options: &ViewOptions,
        scheduler: Scheduler,
        sensors: Arc<RwLock<Option<SensorData>>>,
    ) -> Self {
        let host = format!("{}:{}", options.host, options.port);
        Self {
            screen: options.screen,
            output: options.output.clone(),
            document: None,
            sensors,
            current_profile: None,
            render: RenderState::new(&host),
            scheduler,
            sources: BTreeMap::new(),
        }
    }

    pub fn handle_message(&mut self, response: Response) {
        match response.cmd.as_str() {
            cmd::WIDGETS => {
                let Some(data) = response.data else {
                    warn!("widgets message without data");
                    return;
                };
                match WidgetDocument::from_value(data) {
                    Ok(document) => {
                        info!(widgets = document.widgets.len(), "received widget document");
                        self.document = Some(document);
                        self.rebuild();
                    }
                    Err(err) => {
                        warn!("invalid widget document: {}", err);
                    }
                }
            }

            cmd::SENSOR_DATA => {
                let Some(data) = response.data else {
                    warn!("invalid sensor data received");
                    return;
                };
                match serde_json::from_value::<SensorData>(data) {
                    Ok(data) => {
                        // the custom profile follows the game-process sensor
                        let game = data.game_process().to_string();
                        if self.current_profile.as_deref() != Some(game.as_str()) {
                            info!(profile = %game, "profile changed");
                        }
                        self.current_profile = Some(game);
                        if let Ok(mut sensors) = self.sensors.write() {
                            *sensors = Some(data);
                        }
                        self.rebuild();
                    }
                    Err(err) => {
                        warn!("invalid sensor data received: {}", err);
                    }
                }
            }

            other => debug!(cmd = other, "ignoring message"),
        }
    }

    /// Re-render and, when anything changed, swap the output surface and
    /// restart refresh timers for the new element set
    fn rebuild(&mut self) {
        let Some(document) = self.document.take() else {
            debug!("no widgets data");
            return;
        };

        let data = self.sensors.read().ok().and_then(|d| d.clone());
        let profile = data
            .as_ref()
            .map(|d| d.mode().as_str())
            .unwrap_or(PROFILE_DESKTOP);
        let custom = self.current_profile.clone();

        let result = render::render(
            &mut self.render,
            &document,
            data.as_ref(),
            self.screen,
            profile,
            custom.as_deref(),
        );
        self.document = Some(document);

        if result.changed {
            self.scheduler.start(&self.render.elements);
            self.sources = self
                .render
                .elements
                .iter()
                .filter_map(|element| match &element.kind {
                    MediaKind::Image { source } => {
                        Some((element.id.clone(), source.clone()))
                    }
                    MediaKind::Video { .. } => None,
                })
                .collect();
            self.write_output();
        }
    }

    /// Apply a refresh effect to the live surface
    pub fn apply_refresh(&mut self, update: RefreshUpdate) {
        match update {
            RefreshUpdate::ImageSource { id, src } => {
                let Some(previous) = self.sources.get(&id) else {
                    debug!(id = %id, "refresh for an element no longer rendered");
                    return;
                };
                self.render.html = self.render.html.replace(previous, &src);
                self.sources.insert(id, src);
                self.write_output();
            }
            RefreshUpdate::PlaybackRate { id, rate } => {
                debug!(id = %id, rate, "playback rate updated");
            }
        }
    }

    fn write_output(&self) {
        if let Err(err) = std::fs::write(&self.output, &self.render.html) {
            warn!(output = %self.output.display(), "could not write overlay: {}", err);
        }
    }
}

/// Run the render client until interrupted
pub async fn run_view(options: ViewOptions) -> Result<(), SocketError> {
    let sensors: Arc<RwLock<Option<SensorData>>> = Arc::new(RwLock::new(None));
    let (scheduler, mut refresh_rx) = Scheduler::new(Arc::clone(&sensors));
    let mut state = ClientRenderState::new(&options, scheduler, Arc::clone(&sensors));

    loop {
        match AsyncConnection::connect(&options.host, options.port).await {
            Ok(mut conn) => {
                info!(host = %options.host, port = options.port, "connected, requesting widgets");
                if let Err(err) = conn.write_request(&Request::new(cmd::WIDGETS)).await {
                    warn!("could not request widgets: {}", err);
                } else {
                    loop {
                        tokio::select! {
                            result = conn.read_response() => {
                                match result {
                                    Ok(None) => {
                                        info!("socket closed");
                                        break;
                                    }
                                    Ok(Some(message)) => state.handle_message(message),
                                    Err(SocketError::Serialization(err)) => {
                                        warn!("invalid message from server: {}", err);
                                    }
                                    Err(err) => {
                                        warn!("connection error: {}", err);
                                        break;
                                    }
                                }
                            }

                            Some(update) = refresh_rx.recv() => {
                                state.apply_refresh(update);
                            }
                        }
                    }
                }
            }
            Err(err) => {
                debug!("could not connect: {}", err);
            }
        }

        tokio::time::sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::status;

    fn options(tag: &str) -> (ViewOptions, PathBuf) {
        let output = std::env::temp_dir().join(format!(
            "pagewatch-view-{}-{}.html",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&output);
        (
            ViewOptions {
                host: "mr-pc".to_string(),
                port: 30000,
                screen: 0,
                output: output.clone(),
            },
            output,
        )
    }

    fn widgets_message(widgets: serde_json::Value) -> Response {
        Response {
            cmd: cmd::WIDGETS.to_string(),
            result: status::OK,
            data: Some(serde_json::json!({ "widgets": widgets })),
        }
    }

    fn sensor_message(game: &str) -> Response {
        Response {
            cmd: cmd::SENSOR_DATA.to_string(),
            result: status::OK,
            data: Some(serde_json::json!({
                "sensors": {
                    "rtss=>process": {"value": game, "valueRaw": 0.0},
                }
            })),
        }
    }

    #[tokio::test]
    async fn test_sensor_push_renders_and_writes_output() {
        let (options, output) = options("push");
        let sensors = Arc::new(RwLock::new(None));
        let (scheduler, _rx) = Scheduler::new(Arc::clone(&sensors));
        let mut state = ClientRenderState::new(&options, scheduler, sensors);

        state.handle_message(widgets_message(serde_json::json!([
            {"id": "bg", "uri": "bg.png", "screen": 0},
        ])));
        // no telemetry yet: fail closed, empty surface
        assert!(std::fs::read_to_string(&output).unwrap().is_empty());

        state.handle_message(sensor_message(""));
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("bg.png"));

        let _ = std::fs::remove_file(&output);
    }

    #[tokio::test]
    async fn test_profile_transition_tracks_game_sensor() {
        let (options, output) = options("profile");
        let sensors = Arc::new(RwLock::new(None));
        let (scheduler, _rx) = Scheduler::new(Arc::clone(&sensors));
        let mut state = ClientRenderState::new(&options, scheduler, sensors);

        state.handle_message(widgets_message(serde_json::json!([
            {"id": "d", "uri": "desk.png", "screen": 0, "profileType": "desktop"},
            {"id": "g", "uri": "game.png", "screen": 0, "profileType": "game"},
        ])));

        state.handle_message(sensor_message(""));
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("desk.png"));
        assert!(!html.contains("game.png"));

        state.handle_message(sensor_message("doom.exe"));
        assert_eq!(state.current_profile.as_deref(), Some("doom.exe"));
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("game.png"));
        assert!(!html.contains("desk.png"));

        let _ = std::fs::remove_file(&output);
    }

    #[tokio::test]
    async fn test_refresh_update_patches_source() {
        let (options, output) = options("refresh");
        let sensors = Arc::new(RwLock::new(None));
        let (scheduler, _rx) = Scheduler::new(Arc::clone(&sensors));
        let mut state = ClientRenderState::new(&options, scheduler, sensors);

        state.handle_message(widgets_message(serde_json::json!([
            {"id": "cam", "uri": "cam.jpg?size=1", "screen": 0, "update": 5000},
        ])));
        state.handle_message(sensor_message(""));

        let src = state.sources.get("cam").unwrap().clone();
        state.apply_refresh(RefreshUpdate::ImageSource {
            id: "cam".to_string(),
            src: format!("{}&t=12345", src),
        });
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("&t=12345"));

        let _ = std::fs::remove_file(&output);
    }
}
