//! Local IPC server for `server-warden-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the lifecycle controller.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status"}
//! {"command": "restart", "auth_token": "secret"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "stop failed"}
//! ```

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::orchestrator::controller::LifecycleController;
use crate::{AppError, Result};

/// Inbound IPC request from `server-warden-ctl`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Shared-secret authentication token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Outbound IPC response to `server-warden-ctl`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn outcome(command: &str, succeeded: bool) -> Self {
        if succeeded {
            Self::success(json!({ "command": command }))
        } else {
            Self::error(format!("{command} failed; see manager log"))
        }
    }
}

/// State shared by every IPC connection.
pub struct IpcState {
    /// Controller receiving the commands.
    pub controller: Arc<LifecycleController>,
    /// Shared secret required on every request, if configured.
    pub auth_token: Option<String>,
}

/// Spawn the IPC server task listening on `name`.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    state: Arc<IpcState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let span = info_span!("ipc_server", name = %name);
    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                            }
                            Err(err) => warn!(%err, "IPC accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(span),
    );

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: Arc<IpcState>) {
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &state).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(info_span!("ipc_conn"))
    .await;
}

/// Route an IPC command to the controller.
pub async fn dispatch_command(request: &IpcRequest, state: &IpcState) -> IpcResponse {
    if let Some(ref expected) = state.auth_token {
        match request.auth_token {
            Some(ref provided) if provided == expected => {}
            _ => {
                warn!(command = %request.command, "IPC request rejected: invalid auth token");
                return IpcResponse::error("unauthorized");
            }
        }
    }

    let controller = &state.controller;
    let command = request.command.as_str();
    async move {
        match command {
            "status" => match serde_json::to_value(controller.status()) {
                Ok(status) => IpcResponse::success(status),
                Err(err) => IpcResponse::error(format!("failed to encode status: {err}")),
            },
            "start" => IpcResponse::outcome(command, controller.start().await),
            "stop" => IpcResponse::outcome(command, controller.stop().await),
            "restart" => IpcResponse::outcome(command, controller.restart().await),
            "update" => IpcResponse::outcome(command, controller.update().await),
            "backup" => IpcResponse::outcome(command, controller.backups().force_backup().await),
            "pause-backups" => {
                controller.backups().pause();
                IpcResponse::success(json!({ "backups_paused": true }))
            }
            "resume-backups" => {
                controller.backups().resume();
                IpcResponse::success(json!({ "backups_paused": false }))
            }
            "force-restart" => {
                IpcResponse::outcome(command, controller.restarts().force_restart().await)
            }
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(info_span!("ipc_command", command = %request.command))
    .await
}
