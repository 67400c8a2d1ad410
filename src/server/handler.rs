//! Connection and message handling
//!
//! One task per connection: a select loop interleaves inbound requests
//! with pushes queued for this session. A malformed message is logged and
//! dropped without tearing the connection down.

use crate::protocol::{
    ButtonsRequest, FileParams, Request, Response, SavePosParams, actions, cmd, status,
};
use crate::socket::SocketError;
use crate::transport::AsyncConnection;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use super::ServerInner;

type ServerResult<T> = std::result::Result<T, SocketError>;

pub(super) async fn handle_connection(
    stream: TcpStream,
    inner: Arc<ServerInner>,
) -> ServerResult<()> {
    let mut conn = AsyncConnection::new(stream);
    let (push_tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let mut session_id: Option<u64> = None;

    loop {
        tokio::select! {
            result = conn.read_request() => {
                match result {
                    Ok(None) => break,
                    Ok(Some(request)) => {
                        if let Some(response) =
                            process_request(&request, &mut session_id, &push_tx, &inner).await
                        {
                            conn.write_response(&response).await?;
                        }
                    }
                    Err(SocketError::Serialization(err)) => {
                        warn!("invalid JSON in incoming message: {}", err);
                    }
                    Err(err) => return Err(err),
                }
            }

            Some(line) = push_rx.recv() => {
                conn.writer.write_all(line.as_bytes()).await?;
                conn.writer.flush().await?;
            }
        }
    }

    if let Some(id) = session_id {
        inner.unregister_session(id);
    }

    Ok(())
}

fn params<T: DeserializeOwned>(request: &Request) -> Option<T> {
    let Some(data) = request.data.clone() else {
        warn!(cmd = request.cmd.as_str(), "command is missing its data");
        return None;
    };
    match serde_json::from_value(data) {
        Ok(params) => Some(params),
        Err(err) => {
            warn!(cmd = request.cmd.as_str(), "invalid command data: {}", err);
            None
        }
    }
}

async fn process_request(
    request: &Request,
    session_id: &mut Option<u64>,
    push_tx: &tokio::sync::mpsc::UnboundedSender<String>,
    inner: &Arc<ServerInner>,
) -> Option<Response> {
    match request.cmd.as_str() {
        cmd::WIDGETS => {
            if session_id.is_none() {
                *session_id = Some(inner.register_session(push_tx.clone()));
            }
            match inner.document_json() {
                Some(json) => Some(Response::ok(cmd::WIDGETS, json)),
                None => {
                    warn!("no active document to send");
                    None
                }
            }
        }

        cmd::ACTIVATE_FILE => {
            let FileParams { filename } = params(request)?;
            if let Err(err) = inner.activate_layout(&filename) {
                warn!(filename = %filename, "could not activate file: {}", err);
            }
            None
        }

        cmd::LOAD_WIDGET_DATA => {
            let FileParams { filename } = params(request)?;
            info!(filename = %filename, "loading widget data");
            match inner.store.load_widget_data(&filename) {
                Ok(layout) => match serde_json::to_value(&layout.document) {
                    Ok(json) => Some(Response::ok(cmd::LOAD_WIDGET_DATA, json)),
                    Err(err) => {
                        warn!("could not serialize widget data: {}", err);
                        None
                    }
                },
                Err(err) => {
                    warn!("error loading widget data: {}", err);
                    None
                }
            }
        }

        cmd::SAVE_WIDGET_POS => {
            let SavePosParams { id, pos } = params(request)?;
            match inner.store.update_widget_position(&id, &pos) {
                Ok(()) => Some(Response::ok(cmd::SAVE_WIDGET_POS, "OK".into())),
                Err(err) => {
                    warn!(id = %id, "could not save widget position: {}", err);
                    Some(Response::with_status(cmd::SAVE_WIDGET_POS, status::ERROR))
                }
            }
        }

        cmd::BUTTONS_ACTION => {
            let buttons: ButtonsRequest = params(request)?;
            for action in buttons.into_actions() {
                dispatch_button_action(inner, &action.action, &action.data);
            }
            None
        }

        other => {
            info!(cmd = other, "unhandled command");
            None
        }
    }
}

fn dispatch_button_action(
    inner: &Arc<ServerInner>,
    action: &str,
    data: &crate::protocol::ButtonActionData,
) {
    match action {
        actions::ACTIVATE_PROFILE => {
            let Some(profile) = &data.profile else {
                warn!("activateProfile action without a profile");
                return;
            };
            let filename = format!("widgets_{}.json", profile);
            if let Err(err) = inner.activate_layout(&filename) {
                warn!(filename = %filename, "could not activate profile: {}", err);
            }
        }
        actions::START_PROGRAM => {
            let Some(path) = &data.path else {
                warn!("startProgram action without a path");
                return;
            };
            start_program(path);
        }
        actions::PLAY_SOUND => {
            let Some(path) = &data.path else {
                warn!("playSound action without a path");
                return;
            };
            match &inner.sound_player {
                Some(player) => start_program(&format!("\"{}\" {}", player, path)),
                None => warn!("no sound player configured"),
            }
        }
        other => warn!(action = other, "unknown buttons action"),
    }
}

/// Split a command line of the form `"program path" arg arg` into the
/// program and its arguments; unquoted input is a bare program path
fn parse_command_line(path: &str) -> (String, Vec<String>) {
    let normalized = path.replace('\\', "/");
    let (Some(start), Some(end)) = (normalized.find('"'), normalized.rfind('"')) else {
        return (normalized, Vec::new());
    };
    if start >= end {
        return (normalized, Vec::new());
    }
    let program = normalized[start + 1..end].to_string();
    let args = normalized
        .get(end + 2..)
        .map(|rest| rest.split(' ').map(str::to_string).collect())
        .unwrap_or_default();
    (program, args)
}

/// Spawn a detached process for a buttons action
fn start_program(path: &str) {
    let (program, args) = parse_command_line(path);
    if !std::path::Path::new(&program).exists() {
        warn!(program = %program, "path does not exist");
        return;
    }
    info!(program = %program, ?args, "starting program");

    let mut command = std::process::Command::new(&program);
    command
        .args(&args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Some(dir) = std::path::Path::new(&program).parent() {
        command.current_dir(dir);
    }

    match command.spawn() {
        Ok(_) => info!("process should be running now"),
        Err(err) => warn!("could not start process: {}", err),
    }
}
