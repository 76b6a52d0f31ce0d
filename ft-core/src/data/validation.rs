//! Configuration validation
//!
//! Checks the cross-field invariants of `AppConfiguration`. Curve-level
//! validation lives in the curve engine; this module calls into it for every
//! stored curve and then verifies referential integrity.

use ft_error::{FanTunerError, Result};

use crate::constants::{control, safety};
use crate::data::config::{AppConfiguration, FanControlMode};
use crate::engine::curve::validate_curve;

/// Validate a whole configuration, returning the first violation.
pub fn validate_configuration(config: &AppConfiguration) -> Result<()> {
    if !(control::MIN_POLL_INTERVAL_MS..=control::MAX_POLL_INTERVAL_MS)
        .contains(&config.poll_interval_ms)
    {
        return Err(FanTunerError::config_invalid(format!(
            "poll interval {} ms out of range ({}-{} ms)",
            config.poll_interval_ms,
            control::MIN_POLL_INTERVAL_MS,
            control::MAX_POLL_INTERVAL_MS
        )));
    }

    for (label, temp) in [
        ("CPU", config.emergency_cpu_temp),
        ("GPU", config.emergency_gpu_temp),
    ] {
        if !(safety::MIN_EMERGENCY_TEMP..=safety::MAX_EMERGENCY_TEMP).contains(&temp) {
            return Err(FanTunerError::config_invalid(format!(
                "{} emergency threshold {:.1}°C out of range ({:.0}-{:.0}°C)",
                label,
                temp,
                safety::MIN_EMERGENCY_TEMP,
                safety::MAX_EMERGENCY_TEMP
            )));
        }
    }

    if config.emergency_hysteresis < 0.0 {
        return Err(FanTunerError::config_invalid(
            "emergency hysteresis must not be negative",
        ));
    }

    if !(0.0..=safety::MAX_MIN_FAN_PERCENT).contains(&config.min_fan_percent) {
        return Err(FanTunerError::config_invalid(format!(
            "minimum fan percent {:.1} out of range (0-{:.0})",
            config.min_fan_percent,
            safety::MAX_MIN_FAN_PERCENT
        )));
    }

    if config.curves.is_empty() {
        return Err(FanTunerError::config_invalid(
            "configuration must contain at least one curve",
        ));
    }

    if config.profiles.is_empty() {
        return Err(FanTunerError::config_invalid(
            "configuration must contain at least one profile",
        ));
    }

    for (id, curve) in &config.curves {
        if id != &curve.id {
            return Err(FanTunerError::config_invalid(format!(
                "curve map key '{}' does not match curve id '{}'",
                id, curve.id
            )));
        }
        validate_curve(curve).map_err(|e| {
            FanTunerError::config_invalid(format!("curve '{}': {}", curve.name, e))
        })?;
    }

    let default_count = config.profiles.values().filter(|p| p.is_default).count();
    if default_count != 1 {
        return Err(FanTunerError::config_invalid(format!(
            "exactly one profile must be the default (found {})",
            default_count
        )));
    }

    if !config.profiles.contains_key(&config.active_profile_id) {
        return Err(FanTunerError::config_invalid(format!(
            "active profile '{}' does not exist",
            config.active_profile_id
        )));
    }

    for profile in config.profiles.values() {
        for (key, assignment) in &profile.assignments {
            if key != &assignment.fan_key {
                return Err(FanTunerError::config_invalid(format!(
                    "profile '{}': assignment map key '{}' does not match fan key '{}'",
                    profile.name, key, assignment.fan_key
                )));
            }
            match assignment.mode {
                FanControlMode::Curve => {
                    let Some(curve_id) = assignment.curve_id.as_deref() else {
                        return Err(FanTunerError::config_invalid(format!(
                            "profile '{}': fan '{}' is in curve mode with no curve",
                            profile.name, assignment.fan_key
                        )));
                    };
                    if !config.curves.contains_key(curve_id) {
                        return Err(FanTunerError::config_invalid(format!(
                            "profile '{}': fan '{}' references unknown curve '{}'",
                            profile.name, assignment.fan_key, curve_id
                        )));
                    }
                }
                FanControlMode::Manual => {
                    let Some(percent) = assignment.manual_percent else {
                        return Err(FanTunerError::config_invalid(format!(
                            "profile '{}': fan '{}' is in manual mode with no percent",
                            profile.name, assignment.fan_key
                        )));
                    };
                    if !(0.0..=100.0).contains(&percent) {
                        return Err(FanTunerError::config_invalid(format!(
                            "profile '{}': fan '{}' manual percent {:.1} out of range",
                            profile.name, assignment.fan_key, percent
                        )));
                    }
                }
                FanControlMode::Auto => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::FanAssignment;

    fn valid() -> AppConfiguration {
        AppConfiguration::default()
    }

    #[test]
    fn accepts_default() {
        assert!(validate_configuration(&valid()).is_ok());
    }

    #[test]
    fn rejects_poll_interval_out_of_range() {
        let mut config = valid();
        config.poll_interval_ms = 50;
        assert!(validate_configuration(&config).is_err());
        config.poll_interval_ms = 20_000;
        assert!(validate_configuration(&config).is_err());
        config.poll_interval_ms = 100;
        assert!(validate_configuration(&config).is_ok());
        config.poll_interval_ms = 10_000;
        assert!(validate_configuration(&config).is_ok());
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let mut config = valid();
        config.emergency_cpu_temp = 45.0;
        assert!(validate_configuration(&config).is_err());
        config.emergency_cpu_temp = 125.0;
        assert!(validate_configuration(&config).is_err());
        config.emergency_cpu_temp = 95.0;
        config.emergency_gpu_temp = 130.0;
        assert!(validate_configuration(&config).is_err());
    }

    #[test]
    fn rejects_min_fan_out_of_range() {
        let mut config = valid();
        config.min_fan_percent = 60.0;
        assert!(validate_configuration(&config).is_err());
        config.min_fan_percent = -1.0;
        assert!(validate_configuration(&config).is_err());
        config.min_fan_percent = 50.0;
        assert!(validate_configuration(&config).is_ok());
    }

    #[test]
    fn rejects_missing_active_profile() {
        let mut config = valid();
        config.active_profile_id = "nope".to_string();
        assert!(validate_configuration(&config).is_err());
    }

    #[test]
    fn rejects_dangling_curve_reference() {
        let mut config = valid();
        config
            .profiles
            .get_mut("default")
            .unwrap()
            .assignments
            .insert(
                "chip/fan1/1".to_string(),
                FanAssignment::curve("chip/fan1/1", "missing-curve"),
            );
        assert!(validate_configuration(&config).is_err());
    }

    #[test]
    fn rejects_zero_or_two_defaults() {
        let mut config = valid();
        config.profiles.get_mut("default").unwrap().is_default = false;
        assert!(validate_configuration(&config).is_err());

        let mut config = valid();
        let mut extra = config.profiles.get("default").unwrap().clone();
        extra.id = "extra".to_string();
        extra.name = "Extra".to_string();
        config.profiles.insert("extra".to_string(), extra);
        assert!(validate_configuration(&config).is_err());
    }

    #[test]
    fn rejects_manual_without_percent() {
        let mut config = valid();
        let mut assignment = FanAssignment::manual("chip/fan1/1", 50.0);
        assignment.manual_percent = None;
        config
            .profiles
            .get_mut("default")
            .unwrap()
            .assignments
            .insert("chip/fan1/1".to_string(), assignment);
        assert!(validate_configuration(&config).is_err());
    }

    #[test]
    fn rejects_empty_curve_set() {
        let mut config = valid();
        config.curves.clear();
        assert!(validate_configuration(&config).is_err());
    }
}
