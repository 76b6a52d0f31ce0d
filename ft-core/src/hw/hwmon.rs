//! Linux hwmon adapter
//!
//! Enumerates `/sys/class/hwmon` chips and exposes them through the
//! [`HardwareAdapter`] capability. Duty writes go through `pwmN` with the
//! matching `pwmN_enable` switched to manual mode; `set_auto` restores
//! firmware control (enable mode 2).
//!
//! Sensor files:
//! - `tempN_input` - millidegrees Celsius
//! - `fanN_input`  - RPM
//! - `pwmN`        - duty 0-255, paired with fans by channel index
//! - `inN_input`   - millivolts
//! - `powerN_input` - microwatts

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};

use ft_error::{FanTunerError, Result};

use crate::clock::Clock;
use crate::constants::paths;
use crate::data::fan::{FanControlCapability, FanDevice, FanId};
use crate::data::sensor::{HardwareKind, SensorId, SensorKind, SensorReading};
use crate::hw::{classify_hardware, HardwareAdapter};

const PWM_MAX: f32 = 255.0;

/// PWM enable modes per the hwmon sysfs contract
const PWM_ENABLE_MANUAL: &str = "1";
const PWM_ENABLE_AUTO: &str = "2";

/// One discovered sensor channel
#[derive(Debug, Clone)]
struct SensorChannel {
    id: SensorId,
    label: Option<String>,
    input_path: PathBuf,
    hardware_name: String,
    hardware_kind: HardwareKind,
    /// Divisor turning the raw sysfs integer into the canonical unit
    scale: f32,
}

/// One discovered fan with its optional PWM pairing
#[derive(Debug, Clone)]
struct FanChannel {
    id: FanId,
    label: Option<String>,
    rpm_path: Option<PathBuf>,
    pwm_path: Option<PathBuf>,
    pwm_enable_path: Option<PathBuf>,
    hardware_name: String,
    capability: FanControlCapability,
}

#[derive(Default)]
struct HwmonState {
    initialized: bool,
    sensors: Vec<SensorChannel>,
    fans: Vec<FanChannel>,
    readings: Vec<SensorReading>,
    devices: Vec<FanDevice>,
    /// min/max observed per sensor key across the adapter lifetime
    extremes: HashMap<String, (f32, f32)>,
}

pub struct HwmonAdapter {
    base: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<HwmonState>,
}

impl HwmonAdapter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_base(PathBuf::from(paths::HWMON_BASE), clock)
    }

    /// Adapter rooted at an alternate directory (tests use a temp tree laid
    /// out like sysfs).
    pub fn with_base(base: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            base,
            clock,
            state: Mutex::new(HwmonState::default()),
        }
    }

    fn enumerate(&self) -> Result<(Vec<SensorChannel>, Vec<FanChannel>, Vec<String>)> {
        let mut sensors = Vec::new();
        let mut fans = Vec::new();
        let mut warnings = Vec::new();

        if !self.base.is_dir() {
            return Err(FanTunerError::AdapterInit(format!(
                "{:?} does not exist; no hwmon support?",
                self.base
            )));
        }

        let mut chip_dirs: Vec<PathBuf> = fs::read_dir(&self.base)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        chip_dirs.sort();

        for chip_dir in chip_dirs {
            let chip_basename = chip_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let driver = read_trimmed(&chip_dir.join("name")).unwrap_or_else(|| "unknown".into());
            let hardware_id = format!("{}-{}", driver, chip_basename);
            let kind = classify_hardware(&driver);

            trace!(chip = %hardware_id, ?kind, "scanning hwmon chip");

            let mut found_any = false;

            for n in 1..=32u32 {
                let temp_input = chip_dir.join(format!("temp{n}_input"));
                if temp_input.exists() {
                    found_any = true;
                    sensors.push(SensorChannel {
                        id: SensorId::new(&hardware_id, format!("temp{n}"), SensorKind::Temperature),
                        label: read_trimmed(&chip_dir.join(format!("temp{n}_label"))),
                        input_path: temp_input,
                        hardware_name: driver.clone(),
                        hardware_kind: kind,
                        scale: 1000.0,
                    });
                }

                let in_input = chip_dir.join(format!("in{n}_input"));
                if in_input.exists() {
                    found_any = true;
                    sensors.push(SensorChannel {
                        id: SensorId::new(&hardware_id, format!("in{n}"), SensorKind::Voltage),
                        label: read_trimmed(&chip_dir.join(format!("in{n}_label"))),
                        input_path: in_input,
                        hardware_name: driver.clone(),
                        hardware_kind: kind,
                        scale: 1000.0,
                    });
                }

                let power_input = chip_dir.join(format!("power{n}_input"));
                if power_input.exists() {
                    found_any = true;
                    sensors.push(SensorChannel {
                        id: SensorId::new(&hardware_id, format!("power{n}"), SensorKind::Power),
                        label: read_trimmed(&chip_dir.join(format!("power{n}_label"))),
                        input_path: power_input,
                        hardware_name: driver.clone(),
                        hardware_kind: kind,
                        scale: 1_000_000.0,
                    });
                }
            }

            // fan channels pair with pwm channels by index
            for n in 1..=16u32 {
                let fan_input = chip_dir.join(format!("fan{n}_input"));
                let pwm_path = chip_dir.join(format!("pwm{n}"));
                let has_fan = fan_input.exists();
                let has_pwm = pwm_path.exists();
                if !has_fan && !has_pwm {
                    continue;
                }
                found_any = true;

                let pwm_enable_path = chip_dir.join(format!("pwm{n}_enable"));
                let capability = if has_pwm {
                    if pwm_writable(&pwm_path) {
                        FanControlCapability::FullControl
                    } else {
                        warnings.push(format!(
                            "{}: pwm{} present but not writable (running unprivileged?)",
                            hardware_id, n
                        ));
                        FanControlCapability::MonitorOnly
                    }
                } else {
                    FanControlCapability::MonitorOnly
                };

                fans.push(FanChannel {
                    id: FanId::new(&hardware_id, format!("fan{n}"), n),
                    label: read_trimmed(&chip_dir.join(format!("fan{n}_label"))),
                    rpm_path: has_fan.then_some(fan_input),
                    pwm_path: has_pwm.then_some(pwm_path),
                    pwm_enable_path: pwm_enable_path.exists().then_some(pwm_enable_path),
                    hardware_name: driver.clone(),
                    capability,
                });
            }

            if found_any {
                debug!(chip = %hardware_id, "chip has usable channels");
            }
        }

        info!(
            sensors = sensors.len(),
            fans = fans.len(),
            "hwmon enumeration complete"
        );
        Ok((sensors, fans, warnings))
    }

    fn read_channels(&self, state: &mut HwmonState) -> usize {
        let now = self.clock.now_ms();
        let mut failures = 0usize;

        let mut readings = Vec::with_capacity(state.sensors.len());
        for channel in &state.sensors {
            let value = read_trimmed(&channel.input_path)
                .and_then(|s| s.parse::<f64>().ok())
                .map(|raw| (raw / channel.scale as f64) as f32);

            match value {
                Some(value) => {
                    let key = channel.id.key();
                    let entry = state
                        .extremes
                        .entry(key)
                        .and_modify(|(min, max)| {
                            *min = min.min(value);
                            *max = max.max(value);
                        })
                        .or_insert((value, value));

                    readings.push(SensorReading {
                        id: channel.id.clone(),
                        display_name: channel
                            .label
                            .clone()
                            .unwrap_or_else(|| channel.id.name.clone()),
                        hardware_name: channel.hardware_name.clone(),
                        hardware_kind: channel.hardware_kind,
                        value,
                        min_seen: Some(entry.0),
                        max_seen: Some(entry.1),
                        unit: channel.id.kind.unit().to_string(),
                        timestamp_ms: now,
                        is_stale: false,
                    });
                }
                None => {
                    failures += 1;
                    // carry the previous value forward, flagged stale
                    if let Some(previous) = state
                        .readings
                        .iter()
                        .find(|r| r.id == channel.id)
                    {
                        let mut stale = previous.clone();
                        stale.is_stale = true;
                        readings.push(stale);
                    }
                }
            }
        }
        state.readings = readings;

        let mut devices = Vec::with_capacity(state.fans.len());
        for channel in &state.fans {
            let rpm = channel
                .rpm_path
                .as_ref()
                .and_then(|p| read_trimmed(p))
                .and_then(|s| s.parse::<u32>().ok());
            let duty_percent = channel
                .pwm_path
                .as_ref()
                .and_then(|p| read_trimmed(p))
                .and_then(|s| s.parse::<f32>().ok())
                .map(|raw| raw / PWM_MAX * 100.0);

            devices.push(FanDevice {
                id: channel.id.clone(),
                display_name: channel
                    .label
                    .clone()
                    .unwrap_or_else(|| channel.id.name.clone()),
                hardware_name: channel.hardware_name.clone(),
                capability: channel.capability,
                rpm,
                duty_percent,
                min_duty_percent: Some(0.0),
                max_duty_percent: Some(100.0),
                last_update_ms: now,
            });
        }
        state.devices = devices;

        failures
    }
}

impl HardwareAdapter for HwmonAdapter {
    fn initialize(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.initialized {
            return Ok(Vec::new());
        }

        let (sensors, fans, warnings) = self.enumerate()?;
        if sensors.is_empty() && fans.is_empty() {
            return Err(FanTunerError::AdapterInit(
                "no hwmon sensors or fans found".into(),
            ));
        }

        state.sensors = sensors;
        state.fans = fans;
        state.initialized = true;
        self.read_channels(&mut state);
        Ok(warnings)
    }

    fn refresh(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.initialized {
            return Err(FanTunerError::adapter_io("adapter not initialized"));
        }
        let failures = self.read_channels(&mut state);
        if !state.sensors.is_empty() && failures == state.sensors.len() {
            return Err(FanTunerError::adapter_io(
                "every sensor read failed this cycle",
            ));
        }
        Ok(())
    }

    fn sensors(&self) -> Vec<SensorReading> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .readings
            .clone()
    }

    fn fans(&self) -> Vec<FanDevice> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .devices
            .clone()
    }

    fn set_speed(&self, fan_key: &str, percent: f32) -> bool {
        let percent = percent.clamp(0.0, 100.0);
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;

        let Some(channel) = state.fans.iter_mut().find(|f| f.id.key() == fan_key) else {
            warn!(fan = fan_key, "set_speed on unknown fan");
            return false;
        };
        if channel.capability != FanControlCapability::FullControl {
            return false;
        }
        let Some(pwm_path) = channel.pwm_path.clone() else {
            return false;
        };

        let raw = (percent / 100.0 * PWM_MAX).round() as u32;
        let result = write_pwm(&pwm_path, channel.pwm_enable_path.as_deref(), raw);
        if let Err(e) = result {
            warn!(
                fan = fan_key,
                error = %e,
                "duty write failed; downgrading fan to monitor-only"
            );
            channel.capability = FanControlCapability::MonitorOnly;
            if let Some(device) = state.devices.iter_mut().find(|d| d.id.key() == fan_key) {
                device.capability = FanControlCapability::MonitorOnly;
            }
            return false;
        }

        if let Some(device) = state.devices.iter_mut().find(|d| d.id.key() == fan_key) {
            device.duty_percent = Some(percent);
        }
        trace!(fan = fan_key, percent, "duty applied");
        true
    }

    fn set_auto(&self, fan_key: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(channel) = state.fans.iter().find(|f| f.id.key() == fan_key) else {
            return false;
        };
        let Some(enable_path) = channel.pwm_enable_path.as_ref() else {
            // no enable file means firmware never released the fan
            return true;
        };
        match fs::write(enable_path, PWM_ENABLE_AUTO) {
            Ok(()) => {
                debug!(fan = fan_key, "returned to firmware control");
                true
            }
            Err(e) => {
                warn!(fan = fan_key, error = %e, "failed to restore firmware control");
                false
            }
        }
    }

    fn set_all_auto(&self) {
        let keys: Vec<String> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .fans
                .iter()
                .filter(|f| f.capability == FanControlCapability::FullControl)
                .map(|f| f.id.key())
                .collect()
        };
        info!(fans = keys.len(), "restoring firmware control on all fans");
        for key in keys {
            self.set_auto(&key);
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn pwm_writable(path: &Path) -> bool {
    fs::OpenOptions::new().write(true).open(path).is_ok()
}

fn write_pwm(pwm_path: &Path, enable_path: Option<&Path>, raw: u32) -> std::io::Result<()> {
    if let Some(enable) = enable_path {
        let current = fs::read_to_string(enable)
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok());
        if current != Some(1) {
            fs::write(enable, PWM_ENABLE_MANUAL)?;
        }
    }
    fs::write(pwm_path, raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    /// Lay out a fake chip directory the way sysfs does.
    fn fake_chip(root: &Path, index: u32, driver: &str) -> PathBuf {
        let dir = root.join(format!("hwmon{index}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("name"), format!("{driver}\n")).unwrap();
        dir
    }

    fn adapter_over(root: &TempDir) -> HwmonAdapter {
        HwmonAdapter::with_base(root.path().to_path_buf(), ManualClock::new(1_000))
    }

    #[test]
    fn enumerates_sensors_fans_and_capabilities() {
        let root = TempDir::new().unwrap();
        let cpu = fake_chip(root.path(), 0, "coretemp");
        fs::write(cpu.join("temp1_input"), "52000\n").unwrap();
        fs::write(cpu.join("temp1_label"), "Package id 0\n").unwrap();

        let board = fake_chip(root.path(), 1, "nct6775");
        fs::write(board.join("temp1_input"), "38000\n").unwrap();
        fs::write(board.join("fan1_input"), "840\n").unwrap();
        fs::write(board.join("pwm1"), "128\n").unwrap();
        fs::write(board.join("pwm1_enable"), "2\n").unwrap();
        fs::write(board.join("fan2_input"), "0\n").unwrap();

        let adapter = adapter_over(&root);
        adapter.initialize().unwrap();

        let sensors = adapter.sensors();
        let cpu_temp = sensors
            .iter()
            .find(|r| r.hardware_kind == HardwareKind::Cpu)
            .unwrap();
        assert_eq!(cpu_temp.display_name, "Package id 0");
        assert!((cpu_temp.value - 52.0).abs() < 1e-3);
        assert_eq!(cpu_temp.unit, "°C");

        let fans = adapter.fans();
        assert_eq!(fans.len(), 2);
        let controlled = fans.iter().find(|f| f.id.name == "fan1").unwrap();
        assert_eq!(controlled.capability, FanControlCapability::FullControl);
        assert_eq!(controlled.rpm, Some(840));
        assert!((controlled.duty_percent.unwrap() - 50.2).abs() < 0.1);
        let tach_only = fans.iter().find(|f| f.id.name == "fan2").unwrap();
        assert_eq!(tach_only.capability, FanControlCapability::MonitorOnly);
    }

    #[test]
    fn initialize_fails_without_hardware() {
        let root = TempDir::new().unwrap();
        let adapter = adapter_over(&root);
        assert!(matches!(
            adapter.initialize(),
            Err(FanTunerError::AdapterInit(_))
        ));
    }

    #[test]
    fn set_speed_writes_manual_mode_then_duty() {
        let root = TempDir::new().unwrap();
        let board = fake_chip(root.path(), 0, "nct6775");
        fs::write(board.join("fan1_input"), "900\n").unwrap();
        fs::write(board.join("pwm1"), "0\n").unwrap();
        fs::write(board.join("pwm1_enable"), "2\n").unwrap();

        let adapter = adapter_over(&root);
        adapter.initialize().unwrap();
        let key = adapter.fans()[0].id.key();

        assert!(adapter.set_speed(&key, 50.0));
        assert_eq!(fs::read_to_string(board.join("pwm1_enable")).unwrap(), "1");
        assert_eq!(fs::read_to_string(board.join("pwm1")).unwrap(), "128");

        // out-of-range input clamps
        assert!(adapter.set_speed(&key, 150.0));
        assert_eq!(fs::read_to_string(board.join("pwm1")).unwrap(), "255");
    }

    #[test]
    fn set_auto_restores_firmware_mode() {
        let root = TempDir::new().unwrap();
        let board = fake_chip(root.path(), 0, "nct6775");
        fs::write(board.join("fan1_input"), "900\n").unwrap();
        fs::write(board.join("pwm1"), "200\n").unwrap();
        fs::write(board.join("pwm1_enable"), "1\n").unwrap();

        let adapter = adapter_over(&root);
        adapter.initialize().unwrap();
        let key = adapter.fans()[0].id.key();

        assert!(adapter.set_auto(&key));
        assert_eq!(fs::read_to_string(board.join("pwm1_enable")).unwrap(), "2");
    }

    #[test]
    fn io_failure_downgrades_to_monitor_only() {
        let root = TempDir::new().unwrap();
        let board = fake_chip(root.path(), 0, "nct6775");
        fs::write(board.join("fan1_input"), "900\n").unwrap();
        fs::write(board.join("pwm1"), "0\n").unwrap();

        let adapter = adapter_over(&root);
        adapter.initialize().unwrap();
        let key = adapter.fans()[0].id.key();

        // delete the pwm file out from under the adapter
        fs::remove_file(board.join("pwm1")).unwrap();
        assert!(!adapter.set_speed(&key, 40.0));
        assert_eq!(
            adapter.fans()[0].capability,
            FanControlCapability::MonitorOnly
        );
        // subsequent writes are refused without touching the filesystem
        assert!(!adapter.set_speed(&key, 40.0));
    }

    #[test]
    fn failed_read_carries_stale_value() {
        let root = TempDir::new().unwrap();
        let cpu = fake_chip(root.path(), 0, "coretemp");
        fs::write(cpu.join("temp1_input"), "50000\n").unwrap();
        // second sensor so a partial failure is not a refresh error
        fs::write(cpu.join("temp2_input"), "47000\n").unwrap();

        let adapter = adapter_over(&root);
        adapter.initialize().unwrap();
        assert!(!adapter.sensors()[0].is_stale);

        fs::remove_file(cpu.join("temp1_input")).unwrap();
        adapter.refresh().unwrap();

        let readings = adapter.sensors();
        let stale = readings.iter().find(|r| r.id.name == "temp1").unwrap();
        assert!(stale.is_stale);
        assert!((stale.value - 50.0).abs() < 1e-3);
    }

    #[test]
    fn extremes_track_min_and_max() {
        let root = TempDir::new().unwrap();
        let cpu = fake_chip(root.path(), 0, "coretemp");
        fs::write(cpu.join("temp1_input"), "50000\n").unwrap();

        let adapter = adapter_over(&root);
        adapter.initialize().unwrap();

        fs::write(cpu.join("temp1_input"), "64000\n").unwrap();
        adapter.refresh().unwrap();
        fs::write(cpu.join("temp1_input"), "44000\n").unwrap();
        adapter.refresh().unwrap();

        let reading = &adapter.sensors()[0];
        assert!((reading.min_seen.unwrap() - 44.0).abs() < 1e-3);
        assert!((reading.max_seen.unwrap() - 64.0).abs() < 1e-3);
    }
}
