//! In-process control channel for cache commands.
//!
//! Player UI code posts [`ControlRequest`] messages (`cache_status`,
//! `clear_cache`, `update_cache`, `skip_waiting`, `cache_cleanup`,
//! `get_metrics`) and optionally awaits a [`ControlResponse`] on a oneshot
//! reply slot. Commands are dispatched by name to whatever implements
//! [`ControlDispatch`]; unknown commands are logged and dropped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{AirwaveError, Result};

/// A command posted to the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Command name, e.g. `"clear_cache"`.
    pub command: String,
    /// Command arguments; shape depends on the command.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ControlRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(command: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

/// Reply to a control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Dispatches a command by name.
///
/// Returns `Ok(None)` for commands the implementation does not recognize.
#[async_trait::async_trait]
pub trait ControlDispatch: Send + Sync + 'static {
    async fn dispatch(
        &self,
        command: &str,
        params: serde_json::Value,
    ) -> Result<Option<serde_json::Value>>;
}

struct ControlMessage {
    request: ControlRequest,
    reply: Option<oneshot::Sender<ControlResponse>>,
}

/// Sender side of the control channel. Cheap to clone.
#[derive(Clone)]
pub struct ControlSender {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlSender {
    /// Post a command without waiting for a reply.
    pub fn post(&self, request: ControlRequest) {
        let _ = self.tx.send(ControlMessage {
            request,
            reply: None,
        });
    }

    /// Post a command and wait for its reply.
    pub async fn call(&self, request: ControlRequest) -> Result<ControlResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage {
                request,
                reply: Some(reply_tx),
            })
            .map_err(|_| AirwaveError::Other("Control channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| AirwaveError::Other("Control reply dropped".to_string()))
    }
}

/// Handle to the running control loop. Dropping it stops the loop.
pub struct ControlHandle {
    sender: ControlSender,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ControlHandle {
    pub fn sender(&self) -> ControlSender {
        self.sender.clone()
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn the control loop over the given dispatcher.
pub fn start_control<D: ControlDispatch>(dispatch: Arc<D>) -> ControlHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();

    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let command = message.request.command.clone();
            debug!("Control command: {}", command);

            let response = match dispatch
                .dispatch(&command, message.request.params)
                .await
            {
                Ok(Some(data)) => ControlResponse::success(data),
                Ok(None) => {
                    warn!("Ignoring unknown control command: {}", command);
                    ControlResponse::failure(format!("Unknown command: {}", command))
                }
                Err(e) => {
                    warn!("Control command '{}' failed: {}", command, e);
                    ControlResponse::failure(e.to_string())
                }
            };

            if let Some(reply) = message.reply {
                let _ = reply.send(response);
            }
        }
        debug!("Control channel closed");
    });

    ControlHandle {
        sender: ControlSender { tx },
        task: Some(task),
    }
}
