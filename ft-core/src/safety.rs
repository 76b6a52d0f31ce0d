//! Safety supervisor
//!
//! A small state machine (Normal / Emergency) evaluated once per control
//! tick. Entry happens on an over-threshold CPU or GPU temperature or after
//! too many consecutive refresh failures; exit requires both maxima to fall
//! below threshold-minus-hysteresis at the same time.
//!
//! The supervisor never touches the adapter itself. Transitions are returned
//! as [`SafetyTransition`] values and the control loop performs the
//! actuation (drive every controllable fan to 100%) and publishes the alert,
//! so no adapter call ever runs under the supervisor's lock.

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::constants::safety as safety_const;
use crate::data::config::AppConfiguration;
use crate::data::fan::FanDevice;
use crate::data::sensor::{HardwareKind, SensorReading};

/// Thresholds the supervisor enforces, snapshot from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct SafetyThresholds {
    pub emergency_cpu: f32,
    pub emergency_gpu: f32,
    pub hysteresis: f32,
    pub min_fan_percent: f32,
    pub max_consecutive_failures: u32,
}

impl SafetyThresholds {
    pub fn from_config(config: &AppConfiguration) -> Self {
        Self {
            emergency_cpu: config.emergency_cpu_temp,
            emergency_gpu: config.emergency_gpu_temp,
            hysteresis: config.emergency_hysteresis,
            min_fan_percent: config.min_fan_percent,
            max_consecutive_failures: safety_const::MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            emergency_cpu: safety_const::DEFAULT_EMERGENCY_CPU,
            emergency_gpu: safety_const::DEFAULT_EMERGENCY_GPU,
            hysteresis: safety_const::DEFAULT_EMERGENCY_HYSTERESIS,
            min_fan_percent: safety_const::DEFAULT_MIN_FAN_PERCENT,
            max_consecutive_failures: safety_const::MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// State change produced by an evaluation; the caller actuates and alerts.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyTransition {
    EnteredEmergency { reason: String },
    ExitedEmergency,
}

/// Point-in-time view of the supervisor, served through `GetStatus`.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyStatus {
    pub emergency: bool,
    pub emergency_reason: Option<String>,
    pub emergency_since_ms: Option<u64>,
    pub trigger_temperature: Option<f32>,
    pub consecutive_failures: u32,
    /// True whenever at least one refresh failure is outstanding
    pub degraded: bool,
    pub active_warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct SupervisorState {
    emergency: bool,
    emergency_reason: Option<String>,
    emergency_since_ms: Option<u64>,
    trigger_temperature: Option<f32>,
    consecutive_failures: u32,
    active_warnings: Vec<String>,
}

/// The supervisor. One mutex, no calls into other components while held.
pub struct SafetySupervisor {
    thresholds: Mutex<SafetyThresholds>,
    state: Mutex<SupervisorState>,
}

impl SafetySupervisor {
    pub fn new(thresholds: SafetyThresholds) -> Self {
        Self {
            thresholds: Mutex::new(thresholds),
            state: Mutex::new(SupervisorState::default()),
        }
    }

    /// Evaluate one sensor snapshot. Resets the failure counter (the read
    /// succeeded), recomputes warnings, and may transition either way.
    ///
    /// `now_ms` stamps the emergency entry time.
    pub fn evaluate(&self, sensors: &[SensorReading], now_ms: u64) -> Option<SafetyTransition> {
        let thresholds = *self.thresholds.lock().unwrap_or_else(|e| e.into_inner());

        let mut max_cpu: Option<f32> = None;
        let mut max_gpu: Option<f32> = None;
        let mut stale: Vec<&SensorReading> = Vec::new();

        for reading in sensors.iter().filter(|r| r.is_temperature()) {
            if reading.is_stale {
                stale.push(reading);
            }
            match reading.hardware_kind {
                HardwareKind::Cpu => {
                    max_cpu = Some(max_cpu.map_or(reading.value, |m: f32| m.max(reading.value)));
                }
                kind if kind.is_gpu() => {
                    max_gpu = Some(max_gpu.map_or(reading.value, |m: f32| m.max(reading.value)));
                }
                _ => {}
            }
        }

        let mut warnings = Vec::new();
        for (label, max, threshold) in [
            ("CPU", max_cpu, thresholds.emergency_cpu),
            ("GPU", max_gpu, thresholds.emergency_gpu),
        ] {
            if let Some(max) = max {
                if max >= threshold - safety_const::WARNING_MARGIN && max < threshold {
                    warnings.push(format!(
                        "{} temperature high: {:.1}°C (emergency at {:.1}°C)",
                        label, max, threshold
                    ));
                }
            }
        }
        for reading in &stale {
            warnings.push(format!("sensor '{}' is stale", reading.id.key()));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_failures = 0;
        state.active_warnings = warnings;

        if !state.emergency {
            let trigger = if max_cpu.is_some_and(|t| t >= thresholds.emergency_cpu) {
                max_cpu.map(|t| {
                    (
                        format!(
                            "CPU temperature {:.1}°C reached emergency threshold {:.1}°C",
                            t, thresholds.emergency_cpu
                        ),
                        t,
                    )
                })
            } else if max_gpu.is_some_and(|t| t >= thresholds.emergency_gpu) {
                max_gpu.map(|t| {
                    (
                        format!(
                            "GPU temperature {:.1}°C reached emergency threshold {:.1}°C",
                            t, thresholds.emergency_gpu
                        ),
                        t,
                    )
                })
            } else {
                None
            };

            if let Some((reason, temperature)) = trigger {
                error!("EMERGENCY: {}", reason);
                state.emergency = true;
                state.emergency_reason = Some(reason.clone());
                state.emergency_since_ms = Some(now_ms);
                state.trigger_temperature = Some(temperature);
                return Some(SafetyTransition::EnteredEmergency { reason });
            }
            return None;
        }

        // Emergency: leave only when both maxima sit at or below
        // threshold-minus-hysteresis. An absent maximum (no sensors of that
        // kind) is vacuously satisfied.
        let cpu_ok = max_cpu.map_or(true, |t| t <= thresholds.emergency_cpu - thresholds.hysteresis);
        let gpu_ok = max_gpu.map_or(true, |t| t <= thresholds.emergency_gpu - thresholds.hysteresis);

        if cpu_ok && gpu_ok {
            info!("Emergency cleared: temperatures back under hysteresis band");
            state.emergency = false;
            state.emergency_reason = None;
            state.emergency_since_ms = None;
            state.trigger_temperature = None;
            return Some(SafetyTransition::ExitedEmergency);
        }

        None
    }

    /// Record a failed refresh. Reaching the consecutive-failure limit
    /// enters Emergency.
    pub fn record_failure(&self, now_ms: u64) -> Option<SafetyTransition> {
        let thresholds = *self.thresholds.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        state.consecutive_failures += 1;
        warn!(
            failures = state.consecutive_failures,
            "sensor refresh failed"
        );

        if !state.emergency && state.consecutive_failures >= thresholds.max_consecutive_failures {
            let reason = format!(
                "{} consecutive sensor failures",
                state.consecutive_failures
            );
            error!("EMERGENCY: {}", reason);
            state.emergency = true;
            state.emergency_reason = Some(reason.clone());
            state.emergency_since_ms = Some(now_ms);
            state.trigger_temperature = None;
            return Some(SafetyTransition::EnteredEmergency { reason });
        }
        None
    }

    /// Floor a commanded duty at the configured minimum.
    pub fn enforce_minimum(&self, percent: f32) -> f32 {
        let thresholds = self.thresholds.lock().unwrap_or_else(|e| e.into_inner());
        percent.max(thresholds.min_fan_percent)
    }

    /// Check a requested duty against policy.
    ///
    /// `Err` rejects the request; `Ok(Some(_))` accepts with a warning.
    pub fn validate_fan_speed(&self, percent: f32, fan: &FanDevice) -> Result<Option<String>, String> {
        let thresholds = self.thresholds.lock().unwrap_or_else(|e| e.into_inner());

        if !(0.0..=100.0).contains(&percent) {
            return Err(format!("fan speed {:.1}% is out of range (0-100)", percent));
        }
        if percent > 0.0 && percent < thresholds.min_fan_percent {
            return Err(format!(
                "fan speed {:.1}% is below the configured minimum {:.1}%",
                percent, thresholds.min_fan_percent
            ));
        }
        if percent == 0.0 {
            if thresholds.min_fan_percent > 0.0 {
                return Err(format!(
                    "fan speed 0% is below the configured minimum {:.1}%",
                    thresholds.min_fan_percent
                ));
            }
            if fan.is_spinning() {
                return Ok(Some(format!(
                    "setting '{}' to 0% may stop it",
                    fan.display_name
                )));
            }
        }
        Ok(None)
    }

    /// Replace the thresholds atomically (after a configuration change).
    pub fn update_thresholds(&self, config: &AppConfiguration) {
        let mut thresholds = self.thresholds.lock().unwrap_or_else(|e| e.into_inner());
        *thresholds = SafetyThresholds::from_config(config);
    }

    pub fn in_emergency(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).emergency
    }

    /// Snapshot of the supervisor for `GetStatus`.
    pub fn status(&self) -> SafetyStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        SafetyStatus {
            emergency: state.emergency,
            emergency_reason: state.emergency_reason.clone(),
            emergency_since_ms: state.emergency_since_ms,
            trigger_temperature: state.trigger_temperature,
            consecutive_failures: state.consecutive_failures,
            degraded: state.consecutive_failures > 0,
            active_warnings: state.active_warnings.clone(),
        }
    }
}

impl Default for SafetySupervisor {
    fn default() -> Self {
        Self::new(SafetyThresholds::default())
    }
}
