//! Persistent configuration: curves, profiles, thresholds
//!
//! Everything here serializes camelCase with nulls omitted, matching the
//! on-disk and on-wire contract.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{control, curve as curve_const, default_curve, safety};

/// A point on a fan curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvePoint {
    pub temperature: f32,
    pub fan_percent: f32,
}

/// Interpolation shape between curve points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurveInterpolation {
    /// Cosine-smoothed segments (default)
    #[default]
    Cosine,
    /// Straight segments
    Linear,
}

/// A temperature-to-duty mapping with its behavioral knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanCurve {
    pub id: String,
    pub name: String,
    /// Sensor key the curve follows; first CPU temperature when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sensor: Option<String>,
    pub points: Vec<CurvePoint>,
    /// Stall floor
    #[serde(default)]
    pub min_percent: f32,
    /// Ceiling
    #[serde(default = "default_max_percent")]
    pub max_percent: f32,
    /// Minimum output change before the target moves (°C-equivalent band on output)
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f32,
    /// Seconds for a full 0-100% swing; 0 disables slew limiting
    #[serde(default = "default_response_time")]
    pub response_time_s: f32,
    #[serde(default)]
    pub interpolation: CurveInterpolation,
}

fn default_max_percent() -> f32 {
    100.0
}

fn default_hysteresis() -> f32 {
    curve_const::DEFAULT_HYSTERESIS
}

fn default_response_time() -> f32 {
    curve_const::DEFAULT_RESPONSE_TIME_S
}

impl FanCurve {
    /// A curve with default knobs around the given points.
    pub fn new(id: impl Into<String>, name: impl Into<String>, points: Vec<CurvePoint>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_sensor: None,
            points,
            min_percent: 0.0,
            max_percent: 100.0,
            hysteresis: curve_const::DEFAULT_HYSTERESIS,
            response_time_s: curve_const::DEFAULT_RESPONSE_TIME_S,
            interpolation: CurveInterpolation::Cosine,
        }
    }
}

/// How a fan is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FanControlMode {
    /// Defer to hardware/BIOS control
    #[default]
    Auto,
    /// Fixed percent
    Manual,
    /// Follow a curve
    Curve,
}

/// Assignment of one fan within a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanAssignment {
    pub fan_key: String,
    pub mode: FanControlMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_percent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_percent: Option<f32>,
}

impl FanAssignment {
    pub fn auto(fan_key: impl Into<String>) -> Self {
        Self {
            fan_key: fan_key.into(),
            mode: FanControlMode::Auto,
            manual_percent: None,
            curve_id: None,
            last_applied_percent: None,
        }
    }

    pub fn manual(fan_key: impl Into<String>, percent: f32) -> Self {
        Self {
            fan_key: fan_key.into(),
            mode: FanControlMode::Manual,
            manual_percent: Some(percent),
            curve_id: None,
            last_applied_percent: None,
        }
    }

    pub fn curve(fan_key: impl Into<String>, curve_id: impl Into<String>) -> Self {
        Self {
            fan_key: fan_key.into(),
            mode: FanControlMode::Curve,
            manual_percent: None,
            curve_id: Some(curve_id.into()),
            last_applied_percent: None,
        }
    }
}

/// A named mapping from fans to assignments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    /// fan key -> assignment
    #[serde(default)]
    pub assignments: HashMap<String, FanAssignment>,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(default)]
    pub modified_at_ms: u64,
}

/// Telemetry toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySettings {
    /// Broadcast every sensor kind, not just the control-relevant ones
    #[serde(default = "default_true")]
    pub include_all_sensor_kinds: bool,
    /// Include fans that cannot be controlled in telemetry pushes
    #[serde(default = "default_true")]
    pub include_monitor_only_fans: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            include_all_sensor_kinds: true,
            include_monitor_only_fans: true,
        }
    }
}

/// The whole persistent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfiguration {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_emergency_cpu")]
    pub emergency_cpu_temp: f32,
    #[serde(default = "default_emergency_gpu")]
    pub emergency_gpu_temp: f32,
    #[serde(default = "default_emergency_hysteresis")]
    pub emergency_hysteresis: f32,
    /// Floor applied to every commanded duty
    #[serde(default = "default_min_fan")]
    pub min_fan_percent: f32,
    pub active_profile_id: String,
    /// curve id -> curve
    pub curves: HashMap<String, FanCurve>,
    /// profile id -> profile
    pub profiles: HashMap<String, FanProfile>,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

fn default_poll_interval() -> u64 {
    control::DEFAULT_POLL_INTERVAL_MS
}

fn default_emergency_cpu() -> f32 {
    safety::DEFAULT_EMERGENCY_CPU
}

fn default_emergency_gpu() -> f32 {
    safety::DEFAULT_EMERGENCY_GPU
}

fn default_emergency_hysteresis() -> f32 {
    safety::DEFAULT_EMERGENCY_HYSTERESIS
}

fn default_min_fan() -> f32 {
    safety::DEFAULT_MIN_FAN_PERCENT
}

impl AppConfiguration {
    /// Look up the active profile.
    pub fn active_profile(&self) -> Option<&FanProfile> {
        self.profiles.get(&self.active_profile_id)
    }

    /// Look up the default profile.
    pub fn default_profile(&self) -> Option<&FanProfile> {
        self.profiles.values().find(|p| p.is_default)
    }
}

impl Default for AppConfiguration {
    fn default() -> Self {
        let mut curve = FanCurve::new("balanced", "Balanced", default_curve::balanced());
        curve.min_percent = safety::DEFAULT_MIN_FAN_PERCENT;

        let profile = FanProfile {
            id: "default".to_string(),
            name: "Default".to_string(),
            is_default: true,
            assignments: HashMap::new(),
            created_at_ms: 0,
            modified_at_ms: 0,
        };

        let mut curves = HashMap::new();
        curves.insert(curve.id.clone(), curve);
        let mut profiles = HashMap::new();
        profiles.insert(profile.id.clone(), profile);

        Self {
            poll_interval_ms: control::DEFAULT_POLL_INTERVAL_MS,
            emergency_cpu_temp: safety::DEFAULT_EMERGENCY_CPU,
            emergency_gpu_temp: safety::DEFAULT_EMERGENCY_GPU,
            emergency_hysteresis: safety::DEFAULT_EMERGENCY_HYSTERESIS,
            min_fan_percent: safety::DEFAULT_MIN_FAN_PERCENT,
            active_profile_id: "default".to_string(),
            curves,
            profiles,
            telemetry: TelemetrySettings::default(),
        }
    }
}
