//! Control loop
//!
//! One long-lived task drives the sensor->curve->actuation pipeline: refresh
//! the adapter, hand the snapshot to the safety supervisor, resolve the
//! active profile's assignment for every controllable fan, and push a
//! telemetry notification to subscribed clients. The loop owns the
//! last-applied duty per fan; a 0.5% dead-band suppresses write churn.
//!
//! Ordering within a tick is fixed: sensors before safety before actuation
//! before broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use ft_core::constants::control;
use ft_core::data::{
    AppConfiguration, FanControlMode, FanDevice, SensorKind, SensorReading,
};
use ft_core::engine::{apply_response_time, interpolate};
use ft_core::{Clock, ConfigStore, HardwareAdapter, SafetySupervisor, SafetyTransition};
use ft_error::{FanTunerError, Result};
use ft_protocol::{Envelope, Message};

/// Telemetry broadcast capacity: a lagging subscriber loses the oldest
/// notifications instead of blocking the loop.
const TELEMETRY_CHANNEL_CAPACITY: usize = 8;

/// State shared between the control loop and the IPC endpoint.
pub struct DaemonState {
    pub adapter: Arc<dyn HardwareAdapter>,
    pub supervisor: SafetySupervisor,
    pub store: ConfigStore,
    pub clock: Arc<dyn Clock>,

    /// Latest sensor snapshot (replaced wholesale each tick)
    pub sensors: RwLock<Vec<SensorReading>>,
    /// Latest fan snapshot
    pub fans: RwLock<Vec<FanDevice>>,
    /// Last duty written per fan key
    pub last_applied: Mutex<HashMap<String, f32>>,

    /// Warnings surfaced by the adapter at initialization
    pub adapter_warnings: Mutex<Vec<String>>,

    /// Connections whose subscribed flag is set
    pub subscriber_count: AtomicUsize,
    /// All open connections
    pub client_count: AtomicUsize,

    /// Outbound telemetry notifications
    pub telemetry: broadcast::Sender<Envelope>,

    pub shutdown: AtomicBool,
    pub shutdown_notify: Notify,
    pub started_at: Instant,
}

impl DaemonState {
    pub fn new(
        adapter: Arc<dyn HardwareAdapter>,
        store: ConfigStore,
        supervisor: SafetySupervisor,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (telemetry, _) = broadcast::channel(TELEMETRY_CHANNEL_CAPACITY);
        Arc::new(Self {
            adapter,
            supervisor,
            store,
            clock,
            sensors: RwLock::new(Vec::new()),
            fans: RwLock::new(Vec::new()),
            last_applied: Mutex::new(HashMap::new()),
            adapter_warnings: Mutex::new(Vec::new()),
            subscriber_count: AtomicUsize::new(0),
            client_count: AtomicUsize::new(0),
            telemetry,
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            started_at: Instant::now(),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Latest sensor snapshot, cloned.
    pub fn sensor_snapshot(&self) -> Vec<SensorReading> {
        self.sensors.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Latest fan snapshot, cloned.
    pub fn fan_snapshot(&self) -> Vec<FanDevice> {
        self.fans.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Record a duty applied outside the loop (manual IPC set), so the
    /// dead-band sees the true hardware state.
    pub fn note_applied(&self, fan_key: &str, percent: f32) {
        self.last_applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fan_key.to_string(), percent);
    }

    /// Current configuration with in-memory last-applied duties overlaid
    /// onto the active profile's assignments.
    pub fn config_view(&self) -> AppConfiguration {
        let mut config = (*self.store.snapshot()).clone();
        let applied = self.last_applied.lock().unwrap_or_else(|e| e.into_inner());
        for profile in config.profiles.values_mut() {
            for assignment in profile.assignments.values_mut() {
                if let Some(percent) = applied.get(&assignment.fan_key) {
                    assignment.last_applied_percent = Some(*percent);
                }
            }
        }
        config
    }

    /// Build and broadcast one telemetry notification, honoring the
    /// configured toggles. No-op without subscribers.
    pub fn broadcast_telemetry(&self) {
        if self.subscriber_count.load(Ordering::SeqCst) == 0 {
            return;
        }
        let config = self.store.snapshot();

        let mut sensors = self.sensor_snapshot();
        if !config.telemetry.include_all_sensor_kinds {
            sensors.retain(|r| {
                matches!(
                    r.id.kind,
                    SensorKind::Temperature | SensorKind::Fan | SensorKind::Control
                )
            });
        }
        let mut fans = self.fan_snapshot();
        if !config.telemetry.include_monitor_only_fans {
            fans.retain(|f| f.capability.is_controllable());
        }

        let envelope = Envelope::new(
            Message::SensorUpdate {
                sensors,
                fans,
                emergency: self.supervisor.in_emergency(),
            },
            self.clock.now_ms(),
        );
        // receivers that lag simply lose the oldest frames
        let _ = self.telemetry.send(envelope);
    }
}

/// The periodic driver. Owns nothing but a handle to the shared state;
/// per-fan bookkeeping lives in `DaemonState` so the endpoint can see it.
pub struct ControlLoop {
    state: Arc<DaemonState>,
    /// fans currently released to firmware control by this loop
    auto_released: HashSet<String>,
}

impl ControlLoop {
    pub fn new(state: Arc<DaemonState>) -> Self {
        Self {
            state,
            auto_released: HashSet::new(),
        }
    }

    /// Run until shutdown, then return every fan to firmware control.
    pub async fn run(mut self) {
        info!("control loop starting");
        let mut consecutive_errors: u32 = 0;
        let mut last_tick = Instant::now();

        loop {
            if self.state.is_shutting_down() {
                break;
            }

            let started = Instant::now();
            let delta_seconds = started.duration_since(last_tick).as_secs_f32();
            last_tick = started;

            match self.tick(delta_seconds).await {
                Ok(()) => {
                    if consecutive_errors > 0 {
                        debug!(
                            errors = consecutive_errors,
                            "control loop recovered"
                        );
                        consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(error = %e, count = consecutive_errors, "control tick failed");
                    self.sleep_interruptible(control::FAILURE_BACKOFF).await;
                    continue;
                }
            }

            let poll = Duration::from_millis(self.state.store.snapshot().poll_interval_ms);
            let elapsed = started.elapsed();
            if let Some(remaining) = poll.checked_sub(elapsed) {
                self.sleep_interruptible(remaining).await;
            }
        }

        // fans revert to BIOS control whether shutdown is normal or not
        self.state.adapter.set_all_auto();
        info!("control loop stopped, fans returned to firmware control");
    }

    async fn sleep_interruptible(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.state.shutdown_notify.notified() => {}
        }
    }

    /// One iteration of the pipeline. Public so tests drive ticks directly.
    pub async fn tick(&mut self, delta_seconds: f32) -> Result<()> {
        let now = self.state.clock.now_ms();

        // 1. refresh hardware on the blocking pool
        let adapter = self.state.adapter.clone();
        let refresh = tokio::task::spawn_blocking(move || adapter.refresh())
            .await
            .map_err(|e| FanTunerError::adapter_io(format!("refresh task panicked: {e}")))?;

        if let Err(e) = refresh {
            let transition = self.state.supervisor.record_failure(now);
            self.handle_transition(transition);
            return Err(e);
        }

        // 2. replace cached snapshots
        let sensors = self.state.adapter.sensors();
        let fans = self.state.adapter.fans();
        *self.state.sensors.write().unwrap_or_else(|e| e.into_inner()) = sensors.clone();
        *self.state.fans.write().unwrap_or_else(|e| e.into_inner()) = fans.clone();

        // 3. safety check
        let transition = self.state.supervisor.evaluate(&sensors, now);
        self.handle_transition(transition);

        // 4. actuation (suppressed in emergency; the supervisor owns the fans)
        if !self.state.supervisor.in_emergency() {
            self.apply_assignments(&sensors, &fans, delta_seconds);
        }

        // 5. telemetry
        self.state.broadcast_telemetry();
        Ok(())
    }

    fn handle_transition(&mut self, transition: Option<SafetyTransition>) {
        match transition {
            Some(SafetyTransition::EnteredEmergency { reason }) => {
                error!("EMERGENCY: {} - driving all controllable fans to 100%", reason);
                let keys: Vec<String> = self
                    .state
                    .fan_snapshot()
                    .iter()
                    .filter(|f| f.capability.is_controllable())
                    .map(|f| f.id.key())
                    .collect();
                for key in keys {
                    if self.state.adapter.set_speed(&key, 100.0) {
                        self.state.note_applied(&key, 100.0);
                    }
                    self.auto_released.remove(&key);
                }
                self.state.broadcast_telemetry();
            }
            Some(SafetyTransition::ExitedEmergency) => {
                info!("emergency cleared, resuming curve control");
                self.state.broadcast_telemetry();
            }
            None => {}
        }
    }

    fn apply_assignments(
        &mut self,
        sensors: &[SensorReading],
        fans: &[FanDevice],
        delta_seconds: f32,
    ) {
        let state = &self.state;
        let config = state.store.snapshot();
        let Some(profile) = config.active_profile() else {
            warn!(
                profile = %config.active_profile_id,
                "active profile missing, skipping actuation"
            );
            return;
        };

        for fan in fans.iter().filter(|f| f.capability.is_controllable()) {
            let key = fan.id.key();
            let Some(assignment) = profile.assignments.get(&key) else {
                continue;
            };

            let target = match assignment.mode {
                FanControlMode::Auto => {
                    let had_applied = state
                        .last_applied
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&key)
                        .is_some();
                    if had_applied || !self.auto_released.contains(&key) {
                        state.adapter.set_auto(&key);
                        self.auto_released.insert(key.clone());
                        debug!(fan = %key, "released to firmware control");
                    }
                    continue;
                }
                FanControlMode::Manual => {
                    let Some(percent) = assignment.manual_percent else {
                        continue;
                    };
                    percent
                }
                FanControlMode::Curve => {
                    let Some(curve) = assignment
                        .curve_id
                        .as_deref()
                        .and_then(|id| config.curves.get(id))
                    else {
                        warn!(fan = %key, "assignment references missing curve");
                        continue;
                    };

                    let temperature = curve
                        .source_sensor
                        .as_deref()
                        .and_then(|source| {
                            sensors.iter().find(|r| r.id.key() == source).map(|r| r.value)
                        })
                        .or_else(|| {
                            sensors
                                .iter()
                                .find(|r| {
                                    r.is_temperature()
                                        && r.hardware_kind == ft_core::HardwareKind::Cpu
                                })
                                .map(|r| r.value)
                        });
                    let Some(temperature) = temperature else {
                        debug!(fan = %key, "no temperature source available, skipping");
                        continue;
                    };

                    let last = state
                        .last_applied
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(&key)
                        .copied();
                    let raw = interpolate(curve, temperature, last);
                    match last {
                        Some(current) => apply_response_time(
                            current,
                            raw,
                            curve.response_time_s,
                            delta_seconds,
                        ),
                        None => raw,
                    }
                }
            };

            self.auto_released.remove(&key);
            let target = state.supervisor.enforce_minimum(target);

            let last = state
                .last_applied
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&key)
                .copied();
            let within_deadband = last
                .map(|l| (target - l).abs() <= control::DEADBAND_PERCENT)
                .unwrap_or(false);
            if within_deadband {
                continue;
            }

            if state.adapter.set_speed(&key, target) {
                state.note_applied(&key, target);
                debug!(fan = %key, percent = target, "duty applied");
            }
        }
    }
}
