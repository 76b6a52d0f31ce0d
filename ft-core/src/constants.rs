//! Constants and configuration values for FanTuner
//!
//! Centralizes magic numbers, paths, and configuration defaults.
//! Never use magic numbers in other files - add them here first.

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// System-wide configuration directory (used when running as root)
    pub const SYSTEM_CONFIG_DIR: &str = "/etc/fantuner";

    /// Configuration file name
    pub const CONFIG_FILE: &str = "config.json";

    /// Backup directory name (sibling of the config file)
    pub const BACKUP_DIR: &str = "backups";

    /// Default socket path on systems with /run
    pub const RUN_SOCKET: &str = "/run/fantuner.sock";

    /// Fallback socket path
    pub const TMP_SOCKET: &str = "/tmp/fantuner.sock";

    /// PID file path
    pub const PID_FILE: &str = "/run/fantunerd.pid";

    /// Resolve the configuration directory.
    ///
    /// Order: `FANTUNER_CONFIG_DIR` env override, `/etc/fantuner` when
    /// running as euid 0, then the user's XDG config dir.
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("FANTUNER_CONFIG_DIR") {
            return PathBuf::from(dir);
        }
        // SAFETY: geteuid is always safe - it just returns the effective user ID.
        if unsafe { libc::geteuid() } == 0 {
            return PathBuf::from(SYSTEM_CONFIG_DIR);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fantuner")
    }

    /// Resolve the IPC socket path.
    ///
    /// `FANTUNER_SOCKET` overrides (used by tests); otherwise prefer /run.
    pub fn socket_path() -> PathBuf {
        if let Ok(p) = std::env::var("FANTUNER_SOCKET") {
            return PathBuf::from(p);
        }
        if std::path::Path::new("/run").exists() {
            PathBuf::from(RUN_SOCKET)
        } else {
            PathBuf::from(TMP_SOCKET)
        }
    }
}

/// Control loop behavior
pub mod control {
    use std::time::Duration;

    /// Minimum configurable poll interval
    pub const MIN_POLL_INTERVAL_MS: u64 = 100;

    /// Maximum configurable poll interval
    pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;

    /// Default poll interval
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// Duty change below this is not written to hardware (churn suppression)
    pub const DEADBAND_PERCENT: f32 = 0.5;

    /// Back-off after a failed refresh or loop-scope error
    pub const FAILURE_BACKOFF: Duration = Duration::from_secs(1);
}

/// Safety supervisor thresholds
pub mod safety {
    /// Lowest accepted emergency threshold
    pub const MIN_EMERGENCY_TEMP: f32 = 50.0;

    /// Highest accepted emergency threshold
    pub const MAX_EMERGENCY_TEMP: f32 = 120.0;

    /// Default CPU emergency threshold
    pub const DEFAULT_EMERGENCY_CPU: f32 = 95.0;

    /// Default GPU emergency threshold
    pub const DEFAULT_EMERGENCY_GPU: f32 = 90.0;

    /// Default emergency exit hysteresis
    pub const DEFAULT_EMERGENCY_HYSTERESIS: f32 = 5.0;

    /// Consecutive refresh failures that trigger Emergency
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

    /// Margin under the threshold at which a "high" warning is raised
    pub const WARNING_MARGIN: f32 = 10.0;

    /// Upper bound for the configurable default minimum fan percent
    pub const MAX_MIN_FAN_PERCENT: f32 = 50.0;

    /// Default minimum fan percent (stall floor)
    pub const DEFAULT_MIN_FAN_PERCENT: f32 = 20.0;
}

/// Curve bounds
pub mod curve {
    /// Lowest accepted curve point temperature
    pub const MIN_TEMPERATURE: f32 = -40.0;

    /// Highest accepted curve point temperature
    pub const MAX_TEMPERATURE: f32 = 150.0;

    /// Default hysteresis for new curves
    pub const DEFAULT_HYSTERESIS: f32 = 2.0;

    /// Default response time for new curves
    pub const DEFAULT_RESPONSE_TIME_S: f32 = 3.0;

    /// Temperatures closer than this are considered duplicates
    pub const FLOAT_EPSILON: f32 = 1e-6;
}

/// Configuration store behavior
pub mod store {
    /// Timestamped backups kept under the backups directory
    pub const MAX_BACKUPS: usize = 10;
}

/// Default curve shape applied to fresh configurations
pub mod default_curve {
    use crate::data::CurvePoint;

    /// Balanced profile: quiet at idle, full speed near thermal limits
    pub fn balanced() -> Vec<CurvePoint> {
        vec![
            CurvePoint { temperature: 40.0, fan_percent: 20.0 },
            CurvePoint { temperature: 55.0, fan_percent: 35.0 },
            CurvePoint { temperature: 65.0, fan_percent: 55.0 },
            CurvePoint { temperature: 75.0, fan_percent: 80.0 },
            CurvePoint { temperature: 85.0, fan_percent: 100.0 },
        ]
    }
}
