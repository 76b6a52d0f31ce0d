//! Hardware adapter capability
//!
//! One trait covering sensor monitoring and fan control. Two production
//! implementations: [`hwmon::HwmonAdapter`] over `/sys/class/hwmon`, and
//! [`mock::MockAdapter`], a deterministic simulated machine selected with
//! `--mock`. Implementations serialize internally; every method is safe to
//! call concurrently with the control loop's own calls.

pub mod hwmon;
pub mod mock;

use ft_error::Result;

use crate::data::fan::FanDevice;
use crate::data::sensor::{HardwareKind, SensorReading};

pub use hwmon::HwmonAdapter;
pub use mock::MockAdapter;

/// Capability set abstracting the hardware-access layer.
pub trait HardwareAdapter: Send + Sync {
    /// Bring up the hardware. Idempotent; the first failure is fatal
    /// (`AdapterInit`). Returns non-fatal warnings to surface in `GetStatus`.
    fn initialize(&self) -> Result<Vec<String>>;

    /// Re-read every sensor and fan. Fails with `AdapterIo`; the caller
    /// counts the failure and continues.
    fn refresh(&self) -> Result<()>;

    /// Snapshot of all current sensor readings.
    fn sensors(&self) -> Vec<SensorReading>;

    /// Snapshot of all fans with their capability classification.
    fn fans(&self) -> Vec<FanDevice>;

    /// Write a duty cycle (clamped to 0-100). Returns `false` without
    /// failing loudly when the fan is not FullControl; an I/O failure
    /// downgrades the fan to MonitorOnly and also returns `false`.
    fn set_speed(&self, fan_key: &str, percent: f32) -> bool;

    /// Return a fan to hardware/BIOS control.
    fn set_auto(&self, fan_key: &str) -> bool;

    /// Return every fan to hardware/BIOS control. Used at shutdown.
    fn set_all_auto(&self);
}

/// Map a hwmon driver name onto the hardware classification used for
/// thermal thresholds and telemetry grouping.
pub fn classify_hardware(driver_name: &str) -> HardwareKind {
    let name = driver_name.to_ascii_lowercase();

    if name.contains("coretemp") || name.contains("k10temp") || name.contains("zenpower") {
        return HardwareKind::Cpu;
    }
    if name.contains("amdgpu") || name.contains("radeon") {
        return HardwareKind::GpuAmd;
    }
    if name.contains("nvidia") || name.contains("nouveau") {
        return HardwareKind::GpuNvidia;
    }
    if name.contains("i915") || name.contains("xe_") || name == "xe" {
        return HardwareKind::GpuIntel;
    }
    if name.contains("nvme") || name.contains("drivetemp") {
        return HardwareKind::Storage;
    }
    if name.contains("spd5118") || name.contains("jc42") {
        return HardwareKind::Memory;
    }
    if name.starts_with("bat") {
        return HardwareKind::Battery;
    }
    if name.contains("iwlwifi") || name.contains("mlx") {
        return HardwareKind::Network;
    }
    if name.contains("corsair") || name.contains("nzxt") || name.contains("kraken") {
        return HardwareKind::Cooler;
    }
    if name.contains("ec_") || name.contains("-ec") || name.contains("applesmc") {
        return HardwareKind::EmbeddedController;
    }
    if name.contains("psu") || name.contains("corsairpsu") {
        return HardwareKind::Psu;
    }
    if name.contains("nct")
        || name.contains("it8")
        || name.contains("w83")
        || name.contains("f71")
        || name.contains("asus")
        || name.contains("acpitz")
    {
        return HardwareKind::Motherboard;
    }

    HardwareKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_common_drivers() {
        assert_eq!(classify_hardware("coretemp"), HardwareKind::Cpu);
        assert_eq!(classify_hardware("k10temp"), HardwareKind::Cpu);
        assert_eq!(classify_hardware("amdgpu"), HardwareKind::GpuAmd);
        assert_eq!(classify_hardware("nouveau"), HardwareKind::GpuNvidia);
        assert_eq!(classify_hardware("i915"), HardwareKind::GpuIntel);
        assert_eq!(classify_hardware("nvme"), HardwareKind::Storage);
        assert_eq!(classify_hardware("nct6775"), HardwareKind::Motherboard);
        assert_eq!(classify_hardware("acpitz"), HardwareKind::Motherboard);
        assert_eq!(classify_hardware("BAT0"), HardwareKind::Battery);
        assert_eq!(classify_hardware("something-else"), HardwareKind::Unknown);
    }
}
