//! Core data types for FanTuner

pub mod config;
pub mod fan;
pub mod sensor;
pub mod validation;

pub use config::{
    AppConfiguration, CurveInterpolation, CurvePoint, FanAssignment, FanControlMode, FanCurve,
    FanProfile, TelemetrySettings,
};
pub use fan::{FanControlCapability, FanDevice, FanId};
pub use sensor::{HardwareKind, SensorId, SensorKind, SensorReading};
pub use validation::validate_configuration;
