//! FanTuner IPC schema
//!
//! Every frame on the wire is one JSON object: an [`Envelope`] carrying a
//! `type` discriminator, a `requestId` and a `timestamp`, with the payload
//! fields flattened beside them. Requests, responses and the unsolicited
//! `sensorUpdate` notification share the same tagged union.
//!
//! Correlation: a response's envelope id equals the request's envelope id.
//! `originalRequestId` on Ack/Error is an informational echo of the same
//! value.

pub mod client;
pub mod framing;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use ft_core::data::{AppConfiguration, FanDevice, SensorReading};

pub use framing::{read_frame, write_frame, MAX_FRAME_SIZE};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Upper bound accepted for `SubscribeSensors.intervalMs`
const MAX_SUBSCRIBE_INTERVAL_MS: u64 = 3_600_000;

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub request_id: u64,
    /// Unix milliseconds at send time
    pub timestamp: u64,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Wrap a message with a fresh request id.
    pub fn new(message: Message, timestamp_ms: u64) -> Self {
        Self {
            request_id: generate_request_id(),
            timestamp: timestamp_ms,
            message,
        }
    }

    /// Wrap a message under an existing correlation id (responses).
    pub fn with_id(request_id: u64, message: Message, timestamp_ms: u64) -> Self {
        Self {
            request_id,
            timestamp: timestamp_ms,
            message,
        }
    }
}

/// Status payload served by `GetStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub running: bool,
    pub version: String,
    pub uptime_seconds: u64,
    pub emergency: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_reason: Option<String>,
    pub active_profile_id: String,
    pub active_profile_name: String,
    pub warnings: Vec<String>,
    pub connected_clients: usize,
}

/// The tagged message union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    // ------------------------------------------------------------------
    // Requests (client -> daemon)
    // ------------------------------------------------------------------
    GetStatus,
    GetSensors,
    GetFans,
    GetConfig,
    #[serde(rename_all = "camelCase")]
    SetConfig { config: Box<AppConfiguration> },
    #[serde(rename_all = "camelCase")]
    SetFanSpeed { fan_key: String, percent: f32 },
    #[serde(rename_all = "camelCase")]
    SetProfile { profile_id: String },
    #[serde(rename_all = "camelCase")]
    SubscribeSensors { interval_ms: u64 },
    UnsubscribeSensors,

    // ------------------------------------------------------------------
    // Responses (daemon -> client)
    // ------------------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    Status { status: DaemonStatus },
    #[serde(rename_all = "camelCase")]
    Sensors { sensors: Vec<SensorReading> },
    #[serde(rename_all = "camelCase")]
    Fans { fans: Vec<FanDevice> },
    #[serde(rename_all = "camelCase")]
    Config { config: Box<AppConfiguration> },
    #[serde(rename_all = "camelCase")]
    Ack {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        original_request_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        original_request_id: u64,
    },

    // ------------------------------------------------------------------
    // Notifications (daemon -> subscribed clients, fresh request id)
    // ------------------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    SensorUpdate {
        sensors: Vec<SensorReading>,
        fans: Vec<FanDevice>,
        emergency: bool,
    },
}

impl Message {
    /// True for the client-to-daemon operations.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::GetStatus
                | Message::GetSensors
                | Message::GetFans
                | Message::GetConfig
                | Message::SetConfig { .. }
                | Message::SetFanSpeed { .. }
                | Message::SetProfile { .. }
                | Message::SubscribeSensors { .. }
                | Message::UnsubscribeSensors
        )
    }

    /// Validate request parameters before they reach the handler.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Message::SetFanSpeed { fan_key, percent } => {
                if fan_key.is_empty() {
                    return Err("fan key must not be empty".into());
                }
                if !percent.is_finite() || !(0.0..=100.0).contains(percent) {
                    return Err(format!("percent {percent} must be 0-100"));
                }
                Ok(())
            }
            Message::SetProfile { profile_id } => {
                if profile_id.is_empty() {
                    return Err("profile id must not be empty".into());
                }
                Ok(())
            }
            Message::SubscribeSensors { interval_ms } => {
                if *interval_ms > MAX_SUBSCRIBE_INTERVAL_MS {
                    return Err(format!(
                        "interval {interval_ms} ms exceeds maximum {MAX_SUBSCRIBE_INTERVAL_MS} ms"
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::GetStatus => "GetStatus",
            Message::GetSensors => "GetSensors",
            Message::GetFans => "GetFans",
            Message::GetConfig => "GetConfig",
            Message::SetConfig { .. } => "SetConfig",
            Message::SetFanSpeed { .. } => "SetFanSpeed",
            Message::SetProfile { .. } => "SetProfile",
            Message::SubscribeSensors { .. } => "SubscribeSensors",
            Message::UnsubscribeSensors => "UnsubscribeSensors",
            Message::Status { .. } => "Status",
            Message::Sensors { .. } => "Sensors",
            Message::Fans { .. } => "Fans",
            Message::Config { .. } => "Config",
            Message::Ack { .. } => "Ack",
            Message::Error { .. } => "Error",
            Message::SensorUpdate { .. } => "SensorUpdate",
        }
    }

    /// Positive acknowledgement correlated to `request_id`.
    pub fn ack(request_id: u64) -> Self {
        Message::Ack {
            ok: true,
            message: None,
            original_request_id: request_id,
        }
    }

    /// Positive acknowledgement with an advisory message.
    pub fn ack_with(request_id: u64, message: impl Into<String>) -> Self {
        Message::Ack {
            ok: true,
            message: Some(message.into()),
            original_request_id: request_id,
        }
    }

    /// Negative acknowledgement.
    pub fn nack(request_id: u64, message: impl Into<String>) -> Self {
        Message::Ack {
            ok: false,
            message: Some(message.into()),
            original_request_id: request_id,
        }
    }

    /// Protocol-level error.
    pub fn error(request_id: u64, message: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
            original_request_id: request_id,
        }
    }
}
