//! Mock hardware adapter
//!
//! A deterministic simulated desktop: CPU package + load, GPU, motherboard
//! and NVMe sensors, two controllable fans, one tach-only fan and one
//! unavailable header. Thermal noise comes from a seeded RNG and all
//! timestamps from the injected clock, so traces replay identically.
//!
//! Test hooks: [`MockAdapter::set_temperature`] pins a sensor,
//! [`MockAdapter::fail_next_refreshes`] injects refresh errors, and the
//! recorded `set_speed`/`set_auto` calls are exposed for assertions.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use ft_error::{FanTunerError, Result};

use crate::clock::Clock;
use crate::data::fan::{FanControlCapability, FanDevice, FanId};
use crate::data::sensor::{HardwareKind, SensorId, SensorKind, SensorReading};
use crate::hw::HardwareAdapter;

/// A commanded speed, recorded for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedCall {
    pub fan_key: String,
    pub percent: f32,
}

struct MockSensor {
    id: SensorId,
    display_name: String,
    hardware_name: String,
    hardware_kind: HardwareKind,
    base_value: f32,
    /// peak amplitude of simulated drift
    jitter: f32,
    /// pinned by tests; overrides simulation
    forced: Option<f32>,
    value: f32,
    min_seen: f32,
    max_seen: f32,
}

struct MockFan {
    id: FanId,
    display_name: String,
    capability: FanControlCapability,
    /// commanded duty, if any
    duty: Option<f32>,
    rpm: u32,
    max_rpm: u32,
}

struct MockState {
    initialized: bool,
    sensors: Vec<MockSensor>,
    fans: Vec<MockFan>,
    rng: StdRng,
    fail_refreshes: u32,
    refresh_count: u64,
    speed_calls: Vec<SpeedCall>,
    auto_calls: Vec<String>,
}

pub struct MockAdapter {
    clock: Arc<dyn Clock>,
    state: Mutex<MockState>,
}

impl MockAdapter {
    pub fn new(clock: Arc<dyn Clock>, seed: u64) -> Self {
        let sensors = vec![
            sensor(
                "mock-cpu",
                "temp1",
                SensorKind::Temperature,
                "CPU Package",
                "mock-cpu",
                HardwareKind::Cpu,
                52.0,
                4.0,
            ),
            sensor(
                "mock-cpu",
                "load1",
                SensorKind::Load,
                "CPU Total",
                "mock-cpu",
                HardwareKind::Cpu,
                20.0,
                15.0,
            ),
            sensor(
                "mock-gpu",
                "temp1",
                SensorKind::Temperature,
                "GPU Core",
                "mock-gpu",
                HardwareKind::GpuAmd,
                48.0,
                6.0,
            ),
            sensor(
                "mock-gpu",
                "power1",
                SensorKind::Power,
                "GPU Power",
                "mock-gpu",
                HardwareKind::GpuAmd,
                90.0,
                40.0,
            ),
            sensor(
                "mock-board",
                "temp1",
                SensorKind::Temperature,
                "System",
                "mock-board",
                HardwareKind::Motherboard,
                36.0,
                2.0,
            ),
            sensor(
                "mock-board",
                "in1",
                SensorKind::Voltage,
                "+12V",
                "mock-board",
                HardwareKind::Motherboard,
                12.05,
                0.1,
            ),
            sensor(
                "mock-nvme",
                "temp1",
                SensorKind::Temperature,
                "Composite",
                "mock-nvme",
                HardwareKind::Storage,
                41.0,
                3.0,
            ),
        ];

        let fans = vec![
            MockFan {
                id: FanId::new("mock-board", "fan1", 1),
                display_name: "CPU Fan".into(),
                capability: FanControlCapability::FullControl,
                duty: Some(35.0),
                rpm: 700,
                max_rpm: 2000,
            },
            MockFan {
                id: FanId::new("mock-board", "fan2", 2),
                display_name: "Case Fan".into(),
                capability: FanControlCapability::FullControl,
                duty: Some(30.0),
                rpm: 450,
                max_rpm: 1500,
            },
            MockFan {
                id: FanId::new("mock-board", "fan3", 3),
                display_name: "Pump".into(),
                capability: FanControlCapability::MonitorOnly,
                duty: None,
                rpm: 2100,
                max_rpm: 2800,
            },
            MockFan {
                id: FanId::new("mock-board", "fan4", 4),
                display_name: "Rear Header".into(),
                capability: FanControlCapability::Unavailable,
                duty: None,
                rpm: 0,
                max_rpm: 0,
            },
        ];

        Self {
            clock,
            state: Mutex::new(MockState {
                initialized: false,
                sensors,
                fans,
                rng: StdRng::seed_from_u64(seed),
                fail_refreshes: 0,
                refresh_count: 0,
                speed_calls: Vec::new(),
                auto_calls: Vec::new(),
            }),
        }
    }

    /// Pin a sensor to a fixed value (by sensor key).
    pub fn set_temperature(&self, sensor_key: &str, value: f32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sensor) = state.sensors.iter_mut().find(|s| s.id.key() == sensor_key) {
            sensor.forced = Some(value);
        }
    }

    /// Make the next `n` refresh calls fail with AdapterIo.
    pub fn fail_next_refreshes(&self, n: u32) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fail_refreshes = n;
    }

    /// Every `set_speed` accepted so far, oldest first.
    pub fn speed_calls(&self) -> Vec<SpeedCall> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .speed_calls
            .clone()
    }

    /// Every `set_auto` call so far.
    pub fn auto_calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .auto_calls
            .clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.speed_calls.clear();
        state.auto_calls.clear();
    }
}

#[allow(clippy::too_many_arguments)]
fn sensor(
    hardware_id: &str,
    name: &str,
    kind: SensorKind,
    display: &str,
    hardware_name: &str,
    hardware_kind: HardwareKind,
    base_value: f32,
    jitter: f32,
) -> MockSensor {
    MockSensor {
        id: SensorId::new(hardware_id, name, kind),
        display_name: display.into(),
        hardware_name: hardware_name.into(),
        hardware_kind,
        base_value,
        jitter,
        forced: None,
        value: base_value,
        min_seen: base_value,
        max_seen: base_value,
    }
}

impl HardwareAdapter for MockAdapter {
    fn initialize(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.initialized {
            return Ok(Vec::new());
        }
        state.initialized = true;
        debug!(
            sensors = state.sensors.len(),
            fans = state.fans.len(),
            "mock adapter ready"
        );
        Ok(vec!["mock adapter active: no hardware is being touched".into()])
    }

    fn refresh(&self) -> Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        if !state.initialized {
            return Err(FanTunerError::adapter_io("adapter not initialized"));
        }
        if state.fail_refreshes > 0 {
            state.fail_refreshes -= 1;
            return Err(FanTunerError::adapter_io("injected refresh failure"));
        }
        state.refresh_count += 1;

        // slow sinus drift plus a little noise, deterministic per seed
        let phase = state.refresh_count as f32 / 30.0;
        for sensor in &mut state.sensors {
            let value = match sensor.forced {
                Some(forced) => forced,
                None => {
                    let drift = (phase + sensor.base_value).sin() * sensor.jitter * 0.5;
                    let noise: f32 = state.rng.gen_range(-1.0..=1.0) * sensor.jitter * 0.1;
                    sensor.base_value + drift + noise
                }
            };
            sensor.value = value;
            sensor.min_seen = sensor.min_seen.min(value);
            sensor.max_seen = sensor.max_seen.max(value);
        }

        // RPM chases commanded duty with first-order lag
        for fan in &mut state.fans {
            if fan.capability == FanControlCapability::Unavailable {
                continue;
            }
            let target = match (fan.capability, fan.duty) {
                (FanControlCapability::FullControl, Some(duty)) => {
                    (duty / 100.0 * fan.max_rpm as f32) as i64
                }
                _ => fan.rpm as i64,
            };
            let current = fan.rpm as i64;
            fan.rpm = (current + (target - current) / 2).max(0) as u32;
        }
        Ok(())
    }

    fn sensors(&self) -> Vec<SensorReading> {
        let now = self.clock.now_ms();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .sensors
            .iter()
            .map(|s| SensorReading {
                id: s.id.clone(),
                display_name: s.display_name.clone(),
                hardware_name: s.hardware_name.clone(),
                hardware_kind: s.hardware_kind,
                value: s.value,
                min_seen: Some(s.min_seen),
                max_seen: Some(s.max_seen),
                unit: s.id.kind.unit().to_string(),
                timestamp_ms: now,
                is_stale: false,
            })
            .collect()
    }

    fn fans(&self) -> Vec<FanDevice> {
        let now = self.clock.now_ms();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .fans
            .iter()
            .map(|f| FanDevice {
                id: f.id.clone(),
                display_name: f.display_name.clone(),
                hardware_name: f.id.hardware_id.clone(),
                capability: f.capability,
                rpm: (f.capability != FanControlCapability::Unavailable).then_some(f.rpm),
                duty_percent: f.duty,
                min_duty_percent: Some(0.0),
                max_duty_percent: Some(100.0),
                last_update_ms: now,
            })
            .collect()
    }

    fn set_speed(&self, fan_key: &str, percent: f32) -> bool {
        let percent = percent.clamp(0.0, 100.0);
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        let Some(fan) = state.fans.iter_mut().find(|f| f.id.key() == fan_key) else {
            return false;
        };
        if fan.capability != FanControlCapability::FullControl {
            return false;
        }
        fan.duty = Some(percent);
        state.speed_calls.push(SpeedCall {
            fan_key: fan_key.to_string(),
            percent,
        });
        true
    }

    fn set_auto(&self, fan_key: &str) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        let Some(fan) = state.fans.iter_mut().find(|f| f.id.key() == fan_key) else {
            return false;
        };
        if fan.capability != FanControlCapability::FullControl {
            return false;
        }
        fan.duty = None;
        state.auto_calls.push(fan_key.to_string());
        true
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
        for key in keys {
            self.set_auto(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn adapter() -> MockAdapter {
        let mock = MockAdapter::new(ManualClock::new(1_000), 7);
        mock.initialize().unwrap();
        mock
    }

    #[test]
    fn same_seed_replays_identically() {
        let a = adapter();
        let b = adapter();
        for _ in 0..5 {
            a.refresh().unwrap();
            b.refresh().unwrap();
        }
        let values_a: Vec<f32> = a.sensors().iter().map(|s| s.value).collect();
        let values_b: Vec<f32> = b.sensors().iter().map(|s| s.value).collect();
        assert_eq!(values_a, values_b);
    }

    #[test]
    fn forced_temperature_overrides_simulation() {
        let mock = adapter();
        mock.set_temperature("mock-cpu/temp1/temperature", 97.5);
        mock.refresh().unwrap();
        let cpu = mock
            .sensors()
            .into_iter()
            .find(|s| s.id.key() == "mock-cpu/temp1/temperature")
            .unwrap();
        assert_eq!(cpu.value, 97.5);
    }

    #[test]
    fn injected_failures_then_recovery() {
        let mock = adapter();
        mock.fail_next_refreshes(2);
        assert!(mock.refresh().is_err());
        assert!(mock.refresh().is_err());
        assert!(mock.refresh().is_ok());
    }

    #[test]
    fn non_controllable_fans_reject_writes() {
        let mock = adapter();
        assert!(!mock.set_speed("mock-board/fan3/3", 80.0));
        assert!(!mock.set_speed("mock-board/fan4/4", 80.0));
        assert!(!mock.set_speed("mock-board/nope/9", 80.0));
        assert!(mock.speed_calls().is_empty());
    }

    #[test]
    fn rpm_follows_commanded_duty() {
        let mock = adapter();
        let key = "mock-board/fan1/1";
        assert!(mock.set_speed(key, 100.0));
        for _ in 0..12 {
            mock.refresh().unwrap();
        }
        let fan = mock
            .fans()
            .into_iter()
            .find(|f| f.id.key() == key)
            .unwrap();
        assert!(fan.rpm.unwrap() > 1900, "rpm was {:?}", fan.rpm);
    }

    #[test]
    fn set_all_auto_releases_only_controllable_fans() {
        let mock = adapter();
        mock.set_all_auto();
        let calls = mock.auto_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&"mock-board/fan1/1".to_string()));
        assert!(calls.contains(&"mock-board/fan2/2".to_string()));
    }

    #[test]
    fn speed_is_clamped_and_recorded() {
        let mock = adapter();
        assert!(mock.set_speed("mock-board/fan1/1", 140.0));
        assert_eq!(
            mock.speed_calls(),
            vec![SpeedCall {
                fan_key: "mock-board/fan1/1".into(),
                percent: 100.0
            }]
        );
    }
}
