//! Layout server
//!
//! Owns the layout store, the flattened document cache, the sensor cache,
//! and the session registry. Telemetry is ingested from a file or a
//! secondary socket on a fixed 1 s cadence and broadcast to every session;
//! a store watcher re-broadcasts the active document when it changes on
//! disk and re-activates the current layout when a monitored vars file
//! changes.

mod handler;

use crate::document::WidgetDocument;
use crate::protocol::{Response, cmd};
use crate::sensors::SensorData;
use crate::socket::{RETRY_INTERVAL_MS, SocketError};
use crate::store::{ACTIVE_FILE, LayoutStore, StoreError};
use crate::transport::{AsyncConnection, encode_response};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use handler::handle_connection;

type ServerResult<T> = std::result::Result<T, SocketError>;

/// Where sensor telemetry comes from
#[derive(Debug, Clone)]
pub enum SensorSource {
    /// A JSON file under the layout root, polled every second
    File(String),
    /// A telemetry socket polled with a request line every second
    Socket { host: String, port: u16 },
    Disabled,
}

/// Bounded retry for sends that race a concurrent file write
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(RETRY_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub root: PathBuf,
    pub port: u16,
    pub sensors: SensorSource,
    pub retry: RetryPolicy,
    /// Program spawned to play a sound for the `playSound` buttons action
    pub sound_player: Option<String>,
}

pub struct SocketServer {
    inner: Arc<ServerInner>,
    listener: TcpListener,
}

impl SocketServer {
    pub async fn new(options: ServerOptions) -> ServerResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", options.port))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AddrInUse {
                    SocketError::Connection(format!(
                        "Service already running on port {}",
                        options.port
                    ))
                } else {
                    SocketError::Connection(format!("Failed to bind port {}: {}", options.port, e))
                }
            })?;

        let store = LayoutStore::new(options.root.clone());
        let inner = Arc::new(ServerInner::new(store, &options));

        // re-activate the layout recorded by the last run, falling back to
        // whatever flattened document is on disk
        if let Some(current) = inner.store.current_layout() {
            if let Err(err) = inner.activate_layout(&current) {
                warn!(layout = %current, "could not re-activate at startup: {}", err);
            }
        } else {
            match inner.store.active_document() {
                Ok(document) => inner.set_document(document),
                Err(err) => {
                    warn!("no active document at startup: {}", err);
                }
            }
        }

        Ok(Self { inner, listener })
    }

    pub async fn run(&mut self) -> ServerResult<()> {
        info!("layout server listening for connections");

        match self.inner.sensors.clone() {
            SensorSource::File(filename) => {
                tokio::spawn(Self::sensor_file_monitor(
                    Arc::clone(&self.inner),
                    filename,
                ));
            }
            SensorSource::Socket { host, port } => {
                tokio::spawn(Self::sensor_socket_monitor(
                    Arc::clone(&self.inner),
                    host,
                    port,
                ));
            }
            SensorSource::Disabled => {
                info!("sensor monitoring is disabled");
            }
        }

        tokio::spawn(Self::store_watcher(Arc::clone(&self.inner)));

        self.accept_loop().await
    }

    async fn accept_loop(&mut self) -> ServerResult<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "accepted connection");
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, inner).await {
                            warn!("error handling connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Poll a telemetry file every second. A parse failure keeps the
    /// previous reading; stale data beats corrupt data.
    async fn sensor_file_monitor(inner: Arc<ServerInner>, filename: String) {
        info!(file = %filename, "polling sensors file");
        loop {
            tokio::time::sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;

            match inner.store.read_json(&filename) {
                Ok(json) => match serde_json::from_value::<SensorData>(json) {
                    Ok(data) => inner.set_sensor_data(data),
                    Err(err) => {
                        warn!("invalid sensors file, keeping previous data: {}", err);
                    }
                },
                Err(StoreError::Missing(_)) => {
                    debug!(file = %filename, "sensors file not present yet");
                }
                Err(err) => {
                    warn!("could not read sensors file: {}", err);
                }
            }

            inner.broadcast_sensor_data();
        }
    }

    /// Hold a connection to the telemetry socket, requesting a reading
    /// every second; reconnect on a fixed 1 s cadence
    async fn sensor_socket_monitor(inner: Arc<ServerInner>, host: String, port: u16) {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

        loop {
            match AsyncConnection::connect(&host, port).await {
                Ok(mut conn) => {
                    info!(host = %host, port, "connected to sensor socket");
                    loop {
                        if let Err(err) = conn.writer.write_all(b"1\n").await {
                            warn!("sensor poll failed: {}", err);
                            break;
                        }
                        let mut line = String::new();
                        match conn.reader.read_line(&mut line).await {
                            Ok(0) => {
                                warn!("sensor socket closed");
                                break;
                            }
                            Ok(_) => match serde_json::from_str::<SensorData>(line.trim()) {
                                Ok(data) => {
                                    inner.set_sensor_data(data);
                                    inner.broadcast_sensor_data();
                                }
                                Err(err) => {
                                    warn!("invalid sensor payload, keeping previous data: {}", err);
                                }
                            },
                            Err(err) => {
                                warn!("sensor read failed: {}", err);
                                break;
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;
                    }
                }
                Err(err) => {
                    warn!("could not reach sensor socket: {}", err);
                }
            }
            tokio::time::sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;
        }
    }

    /// Watch the store: re-broadcast the active document when it changes,
    /// re-activate the current layout when a monitored vars file changes
    async fn store_watcher(inner: Arc<ServerInner>) {
        let mut active_mtime = inner.store.modified(ACTIVE_FILE);
        let mut vars_mtimes: HashMap<String, SystemTime> = HashMap::new();

        loop {
            tokio::time::sleep(Duration::from_millis(RETRY_INTERVAL_MS)).await;

            if let Some(mtime) = inner.store.modified(ACTIVE_FILE)
                && active_mtime != Some(mtime)
            {
                active_mtime = Some(mtime);
                info!("active document changed on disk");
                inner.broadcast_active_document().await;
            }

            let monitored = inner
                .monitored
                .lock()
                .map(|m| m.clone())
                .unwrap_or_default();
            for filename in monitored {
                let Some(mtime) = inner.store.modified(&filename) else {
                    continue;
                };
                let changed = vars_mtimes
                    .insert(filename.clone(), mtime)
                    .is_some_and(|previous| previous != mtime);
                if changed {
                    info!(file = %filename, "vars file changed, reloading data");
                    if let Some(current) = inner.store.current_layout() {
                        if let Err(err) = inner.activate_layout(&current) {
                            error!("could not re-activate {}: {}", current, err);
                        }
                    }
                }
            }
        }
    }
}

/// One registered render session
pub(crate) struct SessionHandle {
    pub id: u64,
    pub tx: tokio::sync::mpsc::UnboundedSender<String>,
}

/// Shared server state
pub(crate) struct ServerInner {
    pub store: LayoutStore,
    pub sessions: Mutex<Vec<SessionHandle>>,
    next_conn_id: AtomicU64,
    pub sensor_data: Mutex<Option<SensorData>>,
    pub document: Mutex<Option<WidgetDocument>>,
    pub monitored: Mutex<Vec<String>>,
    pub sensors: SensorSource,
    pub retry: RetryPolicy,
    pub sound_player: Option<String>,
}

impl ServerInner {
    pub(crate) fn new(store: LayoutStore, options: &ServerOptions) -> Self {
        Self {
            store,
            sessions: Mutex::new(Vec::new()),
            next_conn_id: AtomicU64::new(1),
            sensor_data: Mutex::new(None),
            document: Mutex::new(None),
            monitored: Mutex::new(Vec::new()),
            sensors: options.sensors.clone(),
            retry: options.retry,
            sound_player: options.sound_player.clone(),
        }
    }

    pub(crate) fn register_session(
        &self,
        tx: tokio::sync::mpsc::UnboundedSender<String>,
    ) -> u64 {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        info!(conn = id, "adding socket");
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(SessionHandle { id, tx });
        }
        id
    }

    pub(crate) fn unregister_session(&self, id: u64) {
        info!(conn = id, "disconnecting socket");
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|s| s.id != id);
        }
    }

    pub(crate) fn set_document(&self, document: WidgetDocument) {
        if let Ok(mut current) = self.document.lock() {
            *current = Some(document);
        }
    }

    pub(crate) fn set_sensor_data(&self, data: SensorData) {
        if let Ok(mut current) = self.sensor_data.lock() {
            *current = Some(data);
        }
    }

    /// Send an encoded line to every session, pruning dead ones
    fn broadcast_line(&self, line: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|session| session.tx.send(line.to_string()).is_ok());
        }
    }

    pub(crate) fn broadcast_response(&self, response: &Response) {
        match encode_response(response) {
            Ok(line) => self.broadcast_line(&line),
            Err(err) => error!("could not encode broadcast: {}", err),
        }
    }

    /// Push the sensor cache to every session
    pub(crate) fn broadcast_sensor_data(&self) {
        let data = self.sensor_data.lock().ok().and_then(|d| d.clone());
        let Some(data) = data else {
            debug!("no sensor data");
            return;
        };
        match serde_json::to_value(&data) {
            Ok(json) => self.broadcast_response(&Response::ok(cmd::SENSOR_DATA, json)),
            Err(err) => error!("could not serialize sensor data: {}", err),
        }
    }

    /// The flattened active document as wire JSON
    pub(crate) fn document_json(&self) -> Option<Value> {
        let document = self.document.lock().ok()?;
        document
            .as_ref()
            .and_then(|doc| serde_json::to_value(doc).ok())
    }

    /// Re-read the active document from disk and broadcast it. The read
    /// can race the writer that produced the change, so it retries under
    /// the bounded policy before giving up.
    pub(crate) async fn broadcast_active_document(&self) {
        for attempt in 1..=self.retry.attempts {
            match self.store.active_document() {
                Ok(document) => {
                    let json = match serde_json::to_value(&document) {
                        Ok(json) => json,
                        Err(err) => {
                            error!("could not serialize document: {}", err);
                            return;
                        }
                    };
                    self.set_document(document);
                    self.broadcast_response(&Response::ok(cmd::WIDGETS, json));
                    return;
                }
                Err(err) => {
                    warn!(attempt, "could not read active document: {}", err);
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
        error!(
            "giving up on active document after {} attempts",
            self.retry.attempts
        );
    }

    /// Activate a layout and broadcast the new document to every session
    pub(crate) fn activate_layout(&self, filename: &str) -> Result<(), StoreError> {
        let layout = self.store.activate(filename)?;
        let json = serde_json::to_value(&layout.document)?;
        self.set_document(layout.document);
        if let Ok(mut monitored) = self.monitored.lock() {
            *monitored = layout.monitored;
        }
        self.broadcast_response(&Response::ok(cmd::WIDGETS, json));
        Ok(())
    }
}
