//! Configuration store
//!
//! Durable holder of the `AppConfiguration`. All mutations validate, write
//! atomically (temp file + fsync + rename), keep timestamped backups, and
//! publish a [`ConfigEvent`] so the IPC endpoint can notify clients. A
//! corrupt file on load is quarantined under the backups directory and
//! replaced with defaults.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use ft_error::{FanTunerError, Result};

use crate::clock::Clock;
use crate::constants::{paths, store as store_const};
use crate::data::config::{AppConfiguration, FanControlMode, FanCurve, FanProfile};
use crate::data::validation::validate_configuration;

/// Broadcast when the stored configuration changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEvent {
    Changed,
}

pub struct ConfigStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    current: Mutex<Arc<AppConfiguration>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl ConfigStore {
    /// Store bound to the default config location.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_path(paths::config_dir().join(paths::CONFIG_FILE), clock)
    }

    pub fn with_path(path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            path,
            clock,
            current: Mutex::new(Arc::new(AppConfiguration::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    /// The current in-memory snapshot.
    pub fn snapshot(&self) -> Arc<AppConfiguration> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Load from disk. Missing file yields (and persists) defaults; a
    /// corrupt file is moved to `backups/config_corrupt_<ts>.json` first.
    pub fn load(&self) -> Result<Arc<AppConfiguration>> {
        if !self.path.exists() {
            info!("no configuration at {:?}, writing defaults", self.path);
            let defaults = AppConfiguration::default();
            self.persist(&defaults)?;
            return Ok(self.replace(defaults));
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| FanTunerError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;

        let parsed: std::result::Result<AppConfiguration, _> = serde_json::from_str(&contents);
        let config = match parsed {
            Ok(config) => match validate_configuration(&config) {
                Ok(()) => config,
                Err(e) => {
                    warn!("configuration on disk is invalid: {}", e);
                    self.quarantine()?;
                    let defaults = AppConfiguration::default();
                    self.persist(&defaults)?;
                    defaults
                }
            },
            Err(e) => {
                warn!("configuration on disk is corrupt: {}", e);
                self.quarantine()?;
                let defaults = AppConfiguration::default();
                self.persist(&defaults)?;
                defaults
            }
        };

        info!(
            curves = config.curves.len(),
            profiles = config.profiles.len(),
            "configuration loaded from {:?}",
            self.path
        );
        Ok(self.replace(config))
    }

    /// Validate and persist a full replacement configuration.
    pub fn save(&self, config: AppConfiguration) -> Result<Arc<AppConfiguration>> {
        validate_configuration(&config)?;
        self.persist(&config)?;
        let snapshot = self.replace(config);
        let _ = self.events.send(ConfigEvent::Changed);
        Ok(snapshot)
    }

    /// Run a mutation against a copy of the current configuration, then
    /// validate, persist and swap it in.
    pub fn update<F>(&self, mutate: F) -> Result<Arc<AppConfiguration>>
    where
        F: FnOnce(&mut AppConfiguration),
    {
        let mut config = (*self.snapshot()).clone();
        mutate(&mut config);
        self.save(config)
    }

    /// Insert or replace a curve.
    pub fn save_curve(&self, curve: FanCurve) -> Result<Arc<AppConfiguration>> {
        self.update(|config| {
            config.curves.insert(curve.id.clone(), curve);
        })
    }

    /// Delete a curve. Assignments referencing it fall back to Auto.
    pub fn delete_curve(&self, curve_id: &str) -> Result<Arc<AppConfiguration>> {
        if !self.snapshot().curves.contains_key(curve_id) {
            return Err(FanTunerError::not_found(format!("curve '{}'", curve_id)));
        }
        self.update(|config| {
            config.curves.remove(curve_id);
            for profile in config.profiles.values_mut() {
                for assignment in profile.assignments.values_mut() {
                    if assignment.curve_id.as_deref() == Some(curve_id) {
                        assignment.curve_id = None;
                        assignment.mode = FanControlMode::Auto;
                    }
                }
            }
        })
    }

    /// Insert or replace a profile, stamping modification time.
    pub fn save_profile(&self, mut profile: FanProfile) -> Result<Arc<AppConfiguration>> {
        let now = self.clock.now_ms();
        if profile.created_at_ms == 0 {
            profile.created_at_ms = now;
        }
        profile.modified_at_ms = now;
        self.update(|config| {
            config.profiles.insert(profile.id.clone(), profile);
        })
    }

    /// Delete a profile. The default is protected; deleting the active
    /// profile re-points active at the default.
    pub fn delete_profile(&self, profile_id: &str) -> Result<Arc<AppConfiguration>> {
        let snapshot = self.snapshot();
        let Some(profile) = snapshot.profiles.get(profile_id) else {
            return Err(FanTunerError::not_found(format!("profile '{}'", profile_id)));
        };
        if profile.is_default {
            return Err(FanTunerError::DefaultProtected);
        }
        self.update(|config| {
            config.profiles.remove(profile_id);
            if config.active_profile_id == profile_id {
                if let Some(default) = config.profiles.values().find(|p| p.is_default) {
                    config.active_profile_id = default.id.clone();
                }
            }
        })
    }

    /// Switch the active profile.
    pub fn set_active_profile(&self, profile_id: &str) -> Result<Arc<AppConfiguration>> {
        if !self.snapshot().profiles.contains_key(profile_id) {
            return Err(FanTunerError::not_found(format!("profile '{}'", profile_id)));
        }
        self.update(|config| {
            config.active_profile_id = profile_id.to_string();
        })
    }

    fn replace(&self, config: AppConfiguration) -> Arc<AppConfiguration> {
        let snapshot = Arc::new(config);
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        snapshot
    }

    fn backup_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(paths::BACKUP_DIR)
    }

    /// Move an unreadable config out of the way, preserving the bytes.
    fn quarantine(&self) -> Result<()> {
        let dir = self.backup_dir();
        fs::create_dir_all(&dir)?;
        let target = dir.join(format!("config_corrupt_{}.json", self.clock.now_ms()));
        fs::rename(&self.path, &target).map_err(|e| FanTunerError::FileWrite {
            path: target.clone(),
            source: e,
        })?;
        warn!("corrupt configuration preserved at {:?}", target);
        Ok(())
    }

    /// Atomic write: temp file in the same directory, fsync, rename over the
    /// target. The previous file is copied into the backups directory first.
    fn persist(&self, config: &AppConfiguration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.path.exists() {
            if let Err(e) = self.backup_current() {
                warn!("could not back up previous configuration: {}", e);
            }
        }

        let json = serde_json::to_string_pretty(config)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).map_err(|e| FanTunerError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
        file.write_all(json.as_bytes())
            .map_err(|e| FanTunerError::FileWrite {
                path: temp_path.clone(),
                source: e,
            })?;
        file.sync_all().map_err(|e| FanTunerError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| FanTunerError::FileWrite {
            path: self.path.clone(),
            source: e,
        })?;

        debug!("configuration persisted to {:?}", self.path);
        Ok(())
    }

    fn backup_current(&self) -> Result<()> {
        let dir = self.backup_dir();
        fs::create_dir_all(&dir)?;
        let target = dir.join(format!("config_{}.json", self.clock.now_ms()));
        fs::copy(&self.path, &target)?;
        self.prune_backups(&dir)?;
        Ok(())
    }

    /// Keep only the newest `MAX_BACKUPS` regular backups. Corrupt-file
    /// quarantines are kept out of the rotation.
    fn prune_backups(&self, dir: &Path) -> Result<()> {
        fn backup_stamp(path: &Path) -> Option<u64> {
            path.file_stem()?
                .to_str()?
                .strip_prefix("config_")?
                .parse()
                .ok()
        }

        let mut backups: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|p| backup_stamp(&p).map(|stamp| (stamp, p)))
            .collect();
        backups.sort_by_key(|(stamp, _)| *stamp);

        while backups.len() > store_const::MAX_BACKUPS {
            let (_, oldest) = backups.remove(0);
            debug!("pruning old backup {:?}", oldest);
            let _ = fs::remove_file(oldest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::config::FanAssignment;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> (ConfigStore, Arc<ManualClock>) {
        let clock = ManualClock::new(1_000);
        let store = ConfigStore::with_path(dir.path().join("config.json"), clock.clone());
        (store, clock)
    }

    #[test]
    fn missing_file_yields_persisted_defaults() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        let config = store.load().unwrap();
        assert_eq!(*config, AppConfiguration::default());
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        let updated = store
            .update(|config| config.poll_interval_ms = 2_000)
            .unwrap();
        assert_eq!(updated.poll_interval_ms, 2_000);

        // a fresh store reading the same path sees the change
        let (reloaded, _) = store_in(&dir);
        let config = reloaded.load().unwrap();
        assert_eq!(*config, *updated);
    }

    #[test]
    fn invalid_update_is_rejected_and_not_persisted() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        let result = store.update(|config| config.poll_interval_ms = 5);
        assert!(result.is_err());
        assert_eq!(
            store.snapshot().poll_interval_ms,
            AppConfiguration::default().poll_interval_ms
        );
    }

    #[test]
    fn corrupt_file_is_quarantined_and_defaults_substituted() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        fs::write(dir.path().join("config.json"), "{not json").unwrap();

        let config = store.load().unwrap();
        assert_eq!(*config, AppConfiguration::default());

        let backups: Vec<_> = fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(backups.iter().any(|n| n.starts_with("config_corrupt_")));
    }

    #[test]
    fn delete_curve_cascades_to_assignments() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        store
            .update(|config| {
                let mut extra = FanCurve::new("extra", "Extra", crate::constants::default_curve::balanced());
                extra.min_percent = 20.0;
                config.curves.insert("extra".into(), extra);
                config
                    .profiles
                    .get_mut("default")
                    .unwrap()
                    .assignments
                    .insert(
                        "chip/fan1/1".into(),
                        FanAssignment::curve("chip/fan1/1", "extra"),
                    );
            })
            .unwrap();

        let config = store.delete_curve("extra").unwrap();
        let assignment = &config.profiles["default"].assignments["chip/fan1/1"];
        assert_eq!(assignment.mode, FanControlMode::Auto);
        assert_eq!(assignment.curve_id, None);

        assert!(matches!(
            store.delete_curve("extra"),
            Err(FanTunerError::NotFound(_))
        ));
    }

    #[test]
    fn default_profile_is_protected() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        assert!(matches!(
            store.delete_profile("default"),
            Err(FanTunerError::DefaultProtected)
        ));
    }

    #[test]
    fn deleting_active_profile_repoints_to_default() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        let profile = FanProfile {
            id: "quiet".into(),
            name: "Quiet".into(),
            is_default: false,
            assignments: Default::default(),
            created_at_ms: 0,
            modified_at_ms: 0,
        };
        store.save_profile(profile).unwrap();
        store.set_active_profile("quiet").unwrap();
        assert_eq!(store.snapshot().active_profile_id, "quiet");

        let config = store.delete_profile("quiet").unwrap();
        assert_eq!(config.active_profile_id, "default");
    }

    #[test]
    fn set_active_profile_requires_existing_id() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        assert!(matches!(
            store.set_active_profile("missing"),
            Err(FanTunerError::NotFound(_))
        ));
    }

    #[test]
    fn save_profile_stamps_timestamps() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store_in(&dir);
        store.load().unwrap();

        clock.set(42_000);
        let profile = FanProfile {
            id: "quiet".into(),
            name: "Quiet".into(),
            is_default: false,
            assignments: Default::default(),
            created_at_ms: 0,
            modified_at_ms: 0,
        };
        let config = store.save_profile(profile).unwrap();
        let saved = &config.profiles["quiet"];
        assert_eq!(saved.created_at_ms, 42_000);
        assert_eq!(saved.modified_at_ms, 42_000);
    }

    #[test]
    fn backups_are_pruned_to_limit() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store_in(&dir);
        store.load().unwrap();

        for i in 0..15u64 {
            clock.advance(1_000);
            store
                .update(|config| config.poll_interval_ms = 1_000 + i)
                .unwrap();
        }

        let backups: Vec<_> = fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("config_") && !n.starts_with("config_corrupt_"))
            .collect();
        assert!(backups.len() <= store_const::MAX_BACKUPS);
    }

    #[test]
    fn mutations_publish_change_events() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        store.load().unwrap();

        let mut events = store.subscribe();
        store
            .update(|config| config.poll_interval_ms = 3_000)
            .unwrap();
        assert_eq!(events.try_recv().unwrap(), ConfigEvent::Changed);
    }
}
