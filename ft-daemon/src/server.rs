//! Unix socket IPC endpoint
//!
//! Serves the request/response schema of `ft-protocol` over length-prefixed
//! frames and forwards telemetry notifications to every connection whose
//! subscribed flag is set.
//!
//! Hardening carried by the endpoint:
//! - symlink refusal when claiming the socket path
//! - connection cap with immediate rejection
//! - read/write timeouts so a stuck peer cannot pin a task
//! - frame size limits enforced before buffering (oversized frames abort
//!   the connection)

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use ft_error::{FanTunerError, Result};
use ft_protocol::{read_frame, write_frame, DaemonStatus, Envelope, Message};

use crate::control_loop::DaemonState;

/// Hard cap on simultaneously connected clients
const MAX_CLIENTS: usize = 16;

/// Acceptor tasks sharing the listener
const ACCEPTOR_POOL_SIZE: usize = 4;

/// Idle wait per read before re-checking the shutdown flag. Subscribed
/// clients legitimately stay quiet, so elapsing is not an error.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per outbound frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// World read/write: access control is the socket directory plus OS-level
/// credentials, matching the published endpoint contract.
const SOCKET_MODE: u32 = 0o666;

static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Bind, serve until shutdown, then close the listener and remove the
/// socket file. The listener closes before the caller releases the adapter,
/// so no inbound mutation can race the final `set_all_auto`.
pub async fn run_server(socket_path: &Path, state: Arc<DaemonState>) -> Result<()> {
    claim_socket_path(socket_path)?;

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!("listening on {:?} (mode {:o})", socket_path, SOCKET_MODE);

    let listener = Arc::new(listener);
    let pool_size = ACCEPTOR_POOL_SIZE.min(MAX_CLIENTS);
    let mut acceptors = Vec::with_capacity(pool_size);
    for index in 0..pool_size {
        let listener = listener.clone();
        let state = state.clone();
        acceptors.push(tokio::spawn(accept_loop(index, listener, state)));
    }

    // wait for shutdown without racing the notification
    loop {
        let notified = state.shutdown_notify.notified();
        if state.is_shutting_down() {
            break;
        }
        notified.await;
    }

    for acceptor in acceptors {
        let _ = acceptor.await;
    }
    drop(listener);
    let _ = std::fs::remove_file(socket_path);
    info!("endpoint stopped");
    Ok(())
}

/// Refuse symlinked socket paths and clear stale sockets left by a
/// previous run.
fn claim_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        let metadata = path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            return Err(FanTunerError::Connection(format!(
                "socket path {:?} is a symlink, refusing",
                path
            )));
        }
        std::fs::remove_file(path)?;
        debug!("removed stale socket file");
    }
    Ok(())
}

async fn accept_loop(index: usize, listener: Arc<UnixListener>, state: Arc<DaemonState>) {
    loop {
        let notified = state.shutdown_notify.notified();
        if state.is_shutting_down() {
            break;
        }
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = state.client_count.load(Ordering::SeqCst);
                        if current >= MAX_CLIENTS {
                            warn!("client cap reached ({}), rejecting connection", current);
                            drop(stream);
                            continue;
                        }
                        let state = state.clone();
                        tokio::spawn(handle_client(stream, state));
                    }
                    Err(e) => {
                        error!(acceptor = index, "accept failed: {}", e);
                    }
                }
            }
            _ = notified => break,
        }
    }
    debug!(acceptor = index, "acceptor stopped");
}

async fn handle_client(stream: UnixStream, state: Arc<DaemonState>) {
    let conn_id = CONNECTION_SEQ.fetch_add(1, Ordering::SeqCst);
    state.client_count.fetch_add(1, Ordering::SeqCst);
    debug!(conn = conn_id, "client connected");

    let (reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let subscribed = Arc::new(AtomicBool::new(false));

    let forwarder = tokio::spawn(forward_telemetry(
        state.clone(),
        writer.clone(),
        subscribed.clone(),
        conn_id,
    ));

    read_requests(reader, &writer, &subscribed, &state, conn_id).await;

    forwarder.abort();
    if subscribed.swap(false, Ordering::SeqCst) {
        state.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }
    state.client_count.fetch_sub(1, Ordering::SeqCst);
    debug!(conn = conn_id, "client disconnected");
}

/// Forward broadcast telemetry to this connection while its subscribed flag
/// is set. A lagged receiver drops the oldest notifications and keeps going.
async fn forward_telemetry(
    state: Arc<DaemonState>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    subscribed: Arc<AtomicBool>,
    conn_id: u64,
) {
    let mut telemetry = state.telemetry.subscribe();
    loop {
        match telemetry.recv().await {
            Ok(envelope) => {
                if !subscribed.load(Ordering::SeqCst) {
                    continue;
                }
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(conn = conn_id, "telemetry serialization failed: {}", e);
                        continue;
                    }
                };
                let mut writer = writer.lock().await;
                let write = timeout(WRITE_TIMEOUT, write_frame(&mut *writer, &json)).await;
                match write {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(conn = conn_id, "telemetry write failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        warn!(conn = conn_id, "telemetry write timed out");
                        break;
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(conn = conn_id, skipped, "slow subscriber, dropped oldest frames");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn read_requests(
    mut reader: OwnedReadHalf,
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    subscribed: &Arc<AtomicBool>,
    state: &Arc<DaemonState>,
    conn_id: u64,
) {
    loop {
        let notified = state.shutdown_notify.notified();
        if state.is_shutting_down() {
            break;
        }
        let read = tokio::select! {
            // stop after the current frame on shutdown
            _ = notified => break,
            read = timeout(READ_TIMEOUT, read_frame(&mut reader)) => read,
        };
        let frame = match read {
            // idle timeout: subscribed clients sit quiet, just re-check shutdown
            Err(_) => continue,
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => break,
            Ok(Err(FanTunerError::FrameInvalid(reason))) => {
                warn!(conn = conn_id, "invalid frame, closing connection: {}", reason);
                break;
            }
            Ok(Err(e)) => {
                debug!(conn = conn_id, "read failed: {}", e);
                break;
            }
        };

        let response = process_frame(&frame, state, subscribed, conn_id).await;
        let json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!(conn = conn_id, "response serialization failed: {}", e);
                continue;
            }
        };

        let mut writer = writer.lock().await;
        match timeout(WRITE_TIMEOUT, write_frame(&mut *writer, &json)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn = conn_id, "write failed: {}", e);
                break;
            }
            Err(_) => {
                warn!(conn = conn_id, "write timed out");
                break;
            }
        }
    }
}

/// Parse and dispatch one inbound frame, always producing a response
/// correlated to the request's envelope id.
async fn process_frame(
    frame: &str,
    state: &Arc<DaemonState>,
    subscribed: &Arc<AtomicBool>,
    conn_id: u64,
) -> Envelope {
    let now = state.clock.now_ms();

    let envelope: Envelope = match serde_json::from_str(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            // salvage the correlation id so the client can fail the request
            let id = serde_json::from_str::<serde_json::Value>(frame)
                .ok()
                .and_then(|v| v.get("requestId").and_then(|id| id.as_u64()))
                .unwrap_or(0);
            debug!(conn = conn_id, "unparseable request: {}", e);
            return Envelope::with_id(id, Message::error(id, "unknown or malformed request"), now);
        }
    };

    let id = envelope.request_id;
    if !envelope.message.is_request() {
        return Envelope::with_id(
            id,
            Message::error(id, format!("{} is not a request", envelope.message.type_name())),
            now,
        );
    }
    if let Err(e) = envelope.message.validate() {
        debug!(conn = conn_id, "request validation failed: {}", e);
        return Envelope::with_id(id, Message::error(id, e), now);
    }

    debug!(
        conn = conn_id,
        id,
        kind = envelope.message.type_name(),
        "processing request"
    );

    let response = match envelope.message {
        Message::GetStatus => {
            let safety = state.supervisor.status();
            let config = state.store.snapshot();
            let profile_name = config
                .active_profile()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let mut warnings = state
                .adapter_warnings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            warnings.extend(safety.active_warnings);

            Message::Status {
                status: DaemonStatus {
                    running: true,
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_seconds: state.started_at.elapsed().as_secs(),
                    emergency: safety.emergency,
                    emergency_reason: safety.emergency_reason,
                    active_profile_id: config.active_profile_id.clone(),
                    active_profile_name: profile_name,
                    warnings,
                    connected_clients: state.client_count.load(Ordering::SeqCst),
                },
            }
        }

        Message::GetSensors => Message::Sensors {
            sensors: state.sensor_snapshot(),
        },

        Message::GetFans => Message::Fans {
            fans: state.fan_snapshot(),
        },

        Message::GetConfig => Message::Config {
            config: Box::new(state.config_view()),
        },

        Message::SetConfig { config } => match state.store.save(*config) {
            Ok(saved) => {
                state.supervisor.update_thresholds(&saved);
                info!(conn = conn_id, "configuration replaced via IPC");
                Message::ack(id)
            }
            Err(e) => Message::nack(id, e.to_string()),
        },

        Message::SetFanSpeed { fan_key, percent } => {
            set_fan_speed(state, &fan_key, percent, id, conn_id)
        }

        Message::SetProfile { profile_id } => match state.store.set_active_profile(&profile_id) {
            Ok(_) => {
                info!(conn = conn_id, profile = %profile_id, "active profile changed");
                Message::ack(id)
            }
            Err(e) => Message::nack(id, e.to_string()),
        },

        Message::SubscribeSensors { interval_ms } => {
            if !subscribed.swap(true, Ordering::SeqCst) {
                state.subscriber_count.fetch_add(1, Ordering::SeqCst);
            }
            debug!(conn = conn_id, interval_ms, "telemetry subscription enabled");
            Message::ack(id)
        }

        Message::UnsubscribeSensors => {
            if subscribed.swap(false, Ordering::SeqCst) {
                state.subscriber_count.fetch_sub(1, Ordering::SeqCst);
            }
            Message::ack(id)
        }

        // is_request() filtered everything else already
        other => Message::error(id, format!("{} is not a request", other.type_name())),
    };

    Envelope::with_id(id, response, now)
}

fn set_fan_speed(
    state: &Arc<DaemonState>,
    fan_key: &str,
    percent: f32,
    id: u64,
    conn_id: u64,
) -> Message {
    let fans = state.fan_snapshot();
    let Some(fan) = fans.iter().find(|f| f.id.key() == fan_key) else {
        return Message::nack(id, format!("unknown fan '{}'", fan_key));
    };
    if !fan.capability.is_controllable() {
        return Message::nack(
            id,
            format!("fan '{}' does not support software control", fan.display_name),
        );
    }

    let warning = match state.supervisor.validate_fan_speed(percent, fan) {
        Ok(warning) => warning,
        Err(reason) => return Message::nack(id, reason),
    };

    if !state.adapter.set_speed(fan_key, percent) {
        return Message::nack(id, format!("fan '{}' rejected the write", fan.display_name));
    }
    state.note_applied(fan_key, percent);
    info!(conn = conn_id, fan = fan_key, percent, "manual speed applied");

    match warning {
        Some(warning) => Message::ack_with(id, warning),
        None => Message::ack(id),
    }
}

/// Resolve the socket path the daemon should bind.
pub fn default_socket_path() -> PathBuf {
    ft_core::constants::paths::socket_path()
}
