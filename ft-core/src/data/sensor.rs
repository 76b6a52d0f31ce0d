//! Sensor identity and readings

use serde::{Deserialize, Serialize};

/// What a sensor measures.
///
/// Only `Temperature`, `Fan` and `Control` participate in control decisions;
/// everything else is passed through for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    Temperature,
    /// Tachometer (RPM)
    Fan,
    Load,
    Voltage,
    Clock,
    Power,
    /// Duty cycle of a controller output
    Control,
    Current,
    Energy,
    Unknown,
}

impl SensorKind {
    /// Canonical unit suffix for this kind.
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Fan => "RPM",
            SensorKind::Load | SensorKind::Control => "%",
            SensorKind::Voltage => "V",
            SensorKind::Clock => "MHz",
            SensorKind::Power => "W",
            SensorKind::Current => "A",
            SensorKind::Energy => "J",
            SensorKind::Unknown => "",
        }
    }

    fn key_fragment(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Fan => "fan",
            SensorKind::Load => "load",
            SensorKind::Voltage => "voltage",
            SensorKind::Clock => "clock",
            SensorKind::Power => "power",
            SensorKind::Control => "control",
            SensorKind::Current => "current",
            SensorKind::Energy => "energy",
            SensorKind::Unknown => "unknown",
        }
    }
}

/// Broad classification of the hardware a sensor or fan belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HardwareKind {
    Cpu,
    GpuNvidia,
    GpuAmd,
    GpuIntel,
    Motherboard,
    Memory,
    Storage,
    Network,
    Cooler,
    EmbeddedController,
    Psu,
    Battery,
    Unknown,
}

impl HardwareKind {
    /// True for any GPU vendor (emergency thresholds treat GPUs uniformly).
    pub fn is_gpu(&self) -> bool {
        matches!(
            self,
            HardwareKind::GpuNvidia | HardwareKind::GpuAmd | HardwareKind::GpuIntel
        )
    }
}

/// Stable identity of a sensor: (hardware id, sensor name, kind).
///
/// Equality is by the triple; `key()` derives the stable string used in
/// curve source references and wire payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorId {
    pub hardware_id: String,
    pub name: String,
    pub kind: SensorKind,
}

impl SensorId {
    pub fn new(hardware_id: impl Into<String>, name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            name: name.into(),
            kind,
        }
    }

    /// Stable unique key, e.g. `coretemp-0/temp1/temperature`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.hardware_id, self.name, self.kind.key_fragment())
    }
}

/// One sensor value as produced by the adapter. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: SensorId,
    pub display_name: String,
    pub hardware_name: String,
    pub hardware_kind: HardwareKind,
    pub value: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_seen: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_seen: Option<f32>,
    pub unit: String,
    /// Unix milliseconds at the time of the read
    pub timestamp_ms: u64,
    /// True when the most recent refresh failed and this value is carried over
    pub is_stale: bool,
}

impl SensorReading {
    /// Shorthand used by the supervisor and control loop.
    pub fn is_temperature(&self) -> bool {
        self.id.kind == SensorKind::Temperature
    }
}
