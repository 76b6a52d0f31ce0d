//! Daemon client
//!
//! Async client over the FanTuner socket, used by the front-end collaborator
//! and the integration tests. Each request installs a pending entry keyed by
//! its envelope id; the background read task resolves it when the matching
//! response arrives and routes unsolicited `sensorUpdate` frames to a
//! separate event channel. Connection loss cancels every pending request.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use ft_error::{FanTunerError, Result};

use crate::framing::{read_frame, write_frame};
use crate::{Envelope, Message};

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request response timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Envelope>>>>;

pub struct DaemonClient {
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl DaemonClient {
    /// Connect to the daemon socket.
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let path = socket_path.as_ref();
        let stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
            .await
            .map_err(|_| FanTunerError::Timeout(format!("connect to {:?}", path)))?
            .map_err(|e| FanTunerError::Connection(format!("connect to {:?}: {}", path, e)))?;

        let (mut reader, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let pending_reader = pending.clone();
        tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut reader).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("client read failed: {}", e);
                        break;
                    }
                };
                let envelope: Envelope = match serde_json::from_str(&frame) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("unparseable frame from daemon: {}", e);
                        continue;
                    }
                };

                if matches!(envelope.message, Message::SensorUpdate { .. }) {
                    let _ = notify_tx.send(envelope);
                    continue;
                }

                let waiter = pending_reader.lock().await.remove(&envelope.request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(envelope);
                    }
                    None => {
                        debug!(
                            id = envelope.request_id,
                            kind = envelope.message.type_name(),
                            "response with no pending request"
                        );
                    }
                }
            }
            // connection is gone: cancel every pending request
            pending_reader.lock().await.clear();
        });

        Ok(Self {
            writer: Mutex::new(writer),
            pending,
            notifications: Mutex::new(Some(notify_rx)),
        })
    }

    /// Send a request and wait for its correlated response.
    pub async fn request(&self, message: Message) -> Result<Envelope> {
        message
            .validate()
            .map_err(FanTunerError::Generic)?;

        let envelope = Envelope::new(message, unix_ms());
        let id = envelope.request_id;
        let json = serde_json::to_string(&envelope)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &json).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(FanTunerError::Connection(
                "connection closed while waiting for response".into(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(FanTunerError::Timeout(format!("request {}", id)))
            }
        }
    }

    /// Take the channel carrying unsolicited `sensorUpdate` frames.
    ///
    /// Can be taken once; subsequent calls return `None`.
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.notifications.lock().await.take()
    }
}

fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
