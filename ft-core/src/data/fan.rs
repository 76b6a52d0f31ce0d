//! Fan identity, capability and device state

use serde::{Deserialize, Serialize};

/// Stable identity of a fan: (hardware id, fan name, channel index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanId {
    pub hardware_id: String,
    pub name: String,
    pub index: u32,
}

impl FanId {
    pub fn new(hardware_id: impl Into<String>, name: impl Into<String>, index: u32) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            name: name.into(),
            index,
        }
    }

    /// Stable unique key, e.g. `nct6775-0/fan1/1`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.hardware_id, self.name, self.index)
    }
}

/// Whether software may write a duty cycle to a fan.
///
/// Anything other than `FullControl` is never written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FanControlCapability {
    FullControl,
    MonitorOnly,
    Unknown,
    Unavailable,
}

impl FanControlCapability {
    pub fn is_controllable(&self) -> bool {
        matches!(self, FanControlCapability::FullControl)
    }
}

/// One fan as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanDevice {
    pub id: FanId,
    pub display_name: String,
    pub hardware_name: String,
    pub capability: FanControlCapability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duty_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duty_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duty_percent: Option<f32>,
    /// Unix milliseconds of the last refresh
    pub last_update_ms: u64,
}

impl FanDevice {
    /// True when the tachometer reports the fan spinning.
    pub fn is_spinning(&self) -> bool {
        self.rpm.map(|r| r > 0).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_key_is_stable() {
        let id = FanId::new("nct6775-0", "fan1", 1);
        assert_eq!(id.key(), "nct6775-0/fan1/1");
    }

    #[test]
    fn only_full_control_is_controllable() {
        assert!(FanControlCapability::FullControl.is_controllable());
        assert!(!FanControlCapability::MonitorOnly.is_controllable());
        assert!(!FanControlCapability::Unknown.is_controllable());
        assert!(!FanControlCapability::Unavailable.is_controllable());
    }

    #[test]
    fn spinning_requires_positive_rpm() {
        let mut fan = FanDevice {
            id: FanId::new("chip", "fan1", 1),
            display_name: "Case Fan".into(),
            hardware_name: "chip".into(),
            capability: FanControlCapability::FullControl,
            rpm: Some(800),
            duty_percent: Some(40.0),
            min_duty_percent: None,
            max_duty_percent: None,
            last_update_ms: 0,
        };
        assert!(fan.is_spinning());
        fan.rpm = Some(0);
        assert!(!fan.is_spinning());
        fan.rpm = None;
        assert!(!fan.is_spinning());
    }
}
