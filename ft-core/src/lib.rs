//! FanTuner Core Library
//!
//! Everything the daemon composes: the data model, the pure curve engine,
//! the safety supervisor, the configuration store and the hardware adapter
//! capability (real hwmon and mock).
//!
//! # Module Structure
//!
//! - `data/` - sensor/fan identities, curves, profiles, configuration
//! - `engine/` - curve interpolation, slew limiting, validation
//! - `hw/` - the `HardwareAdapter` trait and its two implementations
//! - `safety` - the Normal/Emergency state machine
//! - `store` - durable configuration with atomic saves and backups
//! - `clock` - injected wall clock for deterministic tests

pub mod clock;
pub mod constants;
pub mod data;
pub mod engine;
pub mod hw;
pub mod safety;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};

pub use data::{
    AppConfiguration, CurveInterpolation, CurvePoint, FanAssignment, FanControlCapability,
    FanControlMode, FanCurve, FanDevice, FanId, FanProfile, HardwareKind, SensorId, SensorKind,
    SensorReading, TelemetrySettings, validate_configuration,
};

pub use engine::{
    apply_response_time, interpolate, interpolate_linear, normalize_curve, validate_curve,
};

pub use hw::{classify_hardware, HardwareAdapter, HwmonAdapter, MockAdapter};

pub use safety::{SafetyStatus, SafetySupervisor, SafetyThresholds, SafetyTransition};

pub use store::{ConfigEvent, ConfigStore};

pub use ft_error::{FanTunerError, Result};
