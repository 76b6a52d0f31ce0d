//! Curve interpolation, slew limiting, validation and normalization
//!
//! Pure functions over `FanCurve`. Hysteresis state lives with the caller:
//! the previously applied output is passed in and returned unchanged when the
//! raw output has not moved far enough.

use std::f32::consts::PI;

use crate::constants::curve as curve_const;
use crate::data::config::{CurveInterpolation, CurvePoint, FanCurve};

/// Compute the target duty for a temperature, honoring the curve's
/// interpolation flag.
///
/// `last_output` is the duty currently applied to the fan; when provided and
/// the curve has hysteresis, outputs within the hysteresis band hold the
/// previous value instead of chasing every fraction of a degree.
pub fn interpolate(curve: &FanCurve, temperature: f32, last_output: Option<f32>) -> f32 {
    interpolate_shaped(curve, temperature, last_output, curve.interpolation)
}

/// Same bracket selection, hysteresis and clamping as [`interpolate`], with
/// straight segments regardless of the curve's flag.
pub fn interpolate_linear(curve: &FanCurve, temperature: f32, last_output: Option<f32>) -> f32 {
    interpolate_shaped(curve, temperature, last_output, CurveInterpolation::Linear)
}

fn interpolate_shaped(
    curve: &FanCurve,
    temperature: f32,
    last_output: Option<f32>,
    shape: CurveInterpolation,
) -> f32 {
    let clamp = |v: f32| v.clamp(curve.min_percent, curve.max_percent);

    if curve.points.is_empty() {
        return curve.min_percent;
    }
    if curve.points.len() == 1 {
        return clamp(curve.points[0].fan_percent);
    }

    let mut points = curve.points.clone();
    points.sort_by(|a, b| {
        a.temperature
            .partial_cmp(&b.temperature)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let first = &points[0];
    let last = &points[points.len() - 1];

    if temperature <= first.temperature {
        return clamp(first.fan_percent);
    }
    if temperature >= last.temperature {
        return clamp(last.fan_percent);
    }

    let mut raw = last.fan_percent;
    for window in points.windows(2) {
        let lower = &window[0];
        let upper = &window[1];
        if temperature >= lower.temperature && temperature <= upper.temperature {
            let span = upper.temperature - lower.temperature;
            if span.abs() < curve_const::FLOAT_EPSILON {
                raw = lower.fan_percent;
                break;
            }
            let t = (temperature - lower.temperature) / span;
            let s = match shape {
                CurveInterpolation::Cosine => (1.0 - (t * PI).cos()) / 2.0,
                CurveInterpolation::Linear => t,
            };
            raw = lower.fan_percent + (upper.fan_percent - lower.fan_percent) * s;
            break;
        }
    }

    if let Some(last_out) = last_output {
        if curve.hysteresis > 0.0 && (raw - last_out).abs() < curve.hysteresis {
            return clamp(last_out);
        }
    }

    clamp(raw)
}

/// Slew-limit a duty change.
///
/// `response_seconds` is the time a full 0-100% swing is allowed to take;
/// zero or negative disables limiting. Never overshoots: when the remaining
/// distance fits in this tick's budget, the target is returned exactly.
pub fn apply_response_time(
    current: f32,
    target: f32,
    response_seconds: f32,
    delta_seconds: f32,
) -> f32 {
    if response_seconds <= 0.0 {
        return target;
    }

    let max_change = 100.0 * delta_seconds / response_seconds;
    let diff = target - current;
    if diff.abs() <= max_change {
        target
    } else {
        current + diff.signum() * max_change
    }
}

/// Check the structural invariants of a curve, returning the first violation
/// as a human-readable message.
pub fn validate_curve(curve: &FanCurve) -> Result<(), String> {
    if curve.points.len() < 2 {
        return Err("curve must have at least two points".into());
    }

    for (i, point) in curve.points.iter().enumerate() {
        if !(curve_const::MIN_TEMPERATURE..=curve_const::MAX_TEMPERATURE)
            .contains(&point.temperature)
        {
            return Err(format!(
                "point {} temperature {:.1}°C out of range ({:.0} to {:.0}°C)",
                i,
                point.temperature,
                curve_const::MIN_TEMPERATURE,
                curve_const::MAX_TEMPERATURE
            ));
        }
        if !(0.0..=100.0).contains(&point.fan_percent) {
            return Err(format!(
                "point {} fan percent {:.1} out of range (0-100)",
                i, point.fan_percent
            ));
        }
    }

    if !(0.0..=100.0).contains(&curve.min_percent) {
        return Err(format!(
            "minimum percent {:.1} out of range (0-100)",
            curve.min_percent
        ));
    }
    if !(0.0..=100.0).contains(&curve.max_percent) {
        return Err(format!(
            "maximum percent {:.1} out of range (0-100)",
            curve.max_percent
        ));
    }
    if curve.min_percent > curve.max_percent {
        return Err(format!(
            "minimum percent {:.1} exceeds maximum {:.1}",
            curve.min_percent, curve.max_percent
        ));
    }

    let mut sorted: Vec<f32> = curve.points.iter().map(|p| p.temperature).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    for pair in sorted.windows(2) {
        if (pair[1] - pair[0]).abs() < curve_const::FLOAT_EPSILON {
            return Err(format!(
                "duplicate temperature {:.1}°C",
                pair[0]
            ));
        }
    }

    Ok(())
}

/// Deduplicate points by temperature (first occurrence wins, in insertion
/// order) and sort ascending. Every other field passes through unchanged.
pub fn normalize_curve(curve: &FanCurve) -> FanCurve {
    let mut kept: Vec<CurvePoint> = Vec::with_capacity(curve.points.len());
    for point in &curve.points {
        let duplicate = kept
            .iter()
            .any(|k| (k.temperature - point.temperature).abs() < curve_const::FLOAT_EPSILON);
        if !duplicate {
            kept.push(*point);
        }
    }
    kept.sort_by(|a, b| {
        a.temperature
            .partial_cmp(&b.temperature)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut normalized = curve.clone();
    normalized.points = kept;
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn curve_with(points: &[(f32, f32)]) -> FanCurve {
        let mut curve = FanCurve::new(
            "test",
            "Test",
            points
                .iter()
                .map(|&(temperature, fan_percent)| CurvePoint {
                    temperature,
                    fan_percent,
                })
                .collect(),
        );
        curve.hysteresis = 0.0;
        curve.min_percent = 0.0;
        curve.max_percent = 100.0;
        curve
    }

    #[test]
    fn linear_bracket_matches_expected_grid() {
        let mut curve = curve_with(&[(30.0, 30.0), (70.0, 70.0)]);
        curve.interpolation = CurveInterpolation::Linear;
        for (temp, expected) in [
            (30.0, 30.0),
            (40.0, 40.0),
            (50.0, 50.0),
            (60.0, 60.0),
            (70.0, 70.0),
        ] {
            let out = interpolate(&curve, temp, None);
            assert!(
                (out - expected).abs() < 1e-3,
                "T={} expected {} got {}",
                temp,
                expected,
                out
            );
        }
    }

    #[test]
    fn cosine_midpoint_lands_on_the_middle() {
        let curve = curve_with(&[(30.0, 30.0), (60.0, 60.0)]);
        let out = interpolate(&curve, 45.0, None);
        assert!((out - 45.0).abs() <= 1.0, "midpoint was {}", out);
    }

    #[test]
    fn cosine_eases_in_and_out() {
        let curve = curve_with(&[(30.0, 0.0), (70.0, 100.0)]);
        // below the linear line in the first half, above in the second
        assert!(interpolate(&curve, 40.0, None) < 25.0);
        assert!(interpolate(&curve, 60.0, None) > 75.0);
    }

    #[test]
    fn output_below_floor_is_clamped_up() {
        let mut curve = curve_with(&[(30.0, 10.0), (60.0, 60.0)]);
        curve.min_percent = 30.0;
        assert_eq!(interpolate(&curve, 30.0, None), 30.0);
    }

    #[test]
    fn hysteresis_holds_last_output() {
        let mut curve = curve_with(&[(30.0, 30.0), (60.0, 60.0)]);
        curve.hysteresis = 5.0;
        curve.interpolation = CurveInterpolation::Linear;
        // raw at 45°C is 45; |45 - 43| < 5 holds the previous value
        assert_eq!(interpolate(&curve, 45.0, Some(43.0)), 43.0);
        // beyond the band the raw value wins
        assert_eq!(interpolate(&curve, 45.0, Some(30.0)), 45.0);
    }

    #[test]
    fn empty_curve_returns_floor() {
        let mut curve = curve_with(&[]);
        curve.min_percent = 25.0;
        assert_eq!(interpolate(&curve, 50.0, None), 25.0);
    }

    #[test]
    fn single_point_is_clamped_constant() {
        let mut curve = curve_with(&[(50.0, 5.0)]);
        curve.min_percent = 20.0;
        assert_eq!(interpolate(&curve, 10.0, None), 20.0);
        assert_eq!(interpolate(&curve, 90.0, None), 20.0);
    }

    #[test]
    fn edges_clamp_to_end_points() {
        let curve = curve_with(&[(30.0, 30.0), (70.0, 70.0)]);
        assert_eq!(interpolate(&curve, 0.0, None), 30.0);
        assert_eq!(interpolate(&curve, 120.0, None), 70.0);
    }

    #[test]
    fn unsorted_points_are_sorted_before_lookup() {
        let mut curve = curve_with(&[(70.0, 70.0), (30.0, 30.0)]);
        curve.interpolation = CurveInterpolation::Linear;
        let out = interpolate(&curve, 50.0, None);
        assert!((out - 50.0).abs() < 1e-3);
    }

    #[test]
    fn response_time_zero_is_instant() {
        assert_eq!(apply_response_time(20.0, 80.0, 0.0, 1.0), 80.0);
        assert_eq!(apply_response_time(20.0, 80.0, -1.0, 1.0), 80.0);
    }

    #[test]
    fn response_time_limits_step_and_never_overshoots() {
        // 100% per 10 s at 1 s ticks -> 10% per tick
        let step = apply_response_time(20.0, 80.0, 10.0, 1.0);
        assert!((step - 30.0).abs() < 1e-3);

        // downward as well
        let step = apply_response_time(80.0, 20.0, 10.0, 1.0);
        assert!((step - 70.0).abs() < 1e-3);

        // within budget lands exactly on target
        assert_eq!(apply_response_time(75.0, 80.0, 10.0, 1.0), 80.0);
    }

    #[test]
    fn response_time_converges_within_bound() {
        let response: f32 = 5.0;
        let delta: f32 = 1.0;
        let mut current: f32 = 0.0;
        let target: f32 = 100.0;
        let bound = (response / delta).ceil() as usize;
        let mut ticks = 0;
        while (current - target).abs() > 1e-3 {
            current = apply_response_time(current, target, response, delta);
            ticks += 1;
            assert!(ticks <= bound, "did not converge within {} ticks", bound);
        }
    }

    #[test]
    fn validate_rejects_structural_violations() {
        assert!(validate_curve(&curve_with(&[(30.0, 30.0)])).is_err());
        assert!(validate_curve(&curve_with(&[(30.0, 30.0), (30.0, 50.0)])).is_err());
        assert!(validate_curve(&curve_with(&[(-50.0, 30.0), (70.0, 70.0)])).is_err());
        assert!(validate_curve(&curve_with(&[(30.0, 130.0), (70.0, 70.0)])).is_err());

        let mut curve = curve_with(&[(30.0, 30.0), (70.0, 70.0)]);
        curve.min_percent = 80.0;
        curve.max_percent = 20.0;
        assert!(validate_curve(&curve).is_err());

        assert!(validate_curve(&curve_with(&[(30.0, 30.0), (70.0, 70.0)])).is_ok());
    }

    #[test]
    fn validate_rejects_nan() {
        assert!(validate_curve(&curve_with(&[(f32::NAN, 30.0), (70.0, 70.0)])).is_err());
        assert!(validate_curve(&curve_with(&[(30.0, f32::NAN), (70.0, 70.0)])).is_err());
    }

    #[test]
    fn normalize_dedupes_first_wins_and_sorts() {
        let curve = curve_with(&[(70.0, 70.0), (30.0, 30.0), (70.0, 99.0), (50.0, 50.0)]);
        let normalized = normalize_curve(&curve);
        let temps: Vec<f32> = normalized.points.iter().map(|p| p.temperature).collect();
        assert_eq!(temps, vec![30.0, 50.0, 70.0]);
        // the first (70, 70) entry won over (70, 99)
        assert_eq!(normalized.points[2].fan_percent, 70.0);
    }

    #[test]
    fn normalize_is_idempotent() {
        let curve = curve_with(&[(70.0, 70.0), (30.0, 30.0), (70.0, 99.0)]);
        let once = normalize_curve(&curve);
        let twice = normalize_curve(&once);
        assert_eq!(once.points, twice.points);
    }

    // Generates 2-8 points with strictly distinct temperatures in valid range.
    fn arb_valid_points() -> impl Strategy<Value = Vec<CurvePoint>> {
        prop::collection::btree_set(-40i32..=150, 2..8).prop_flat_map(|temps| {
            let temps: Vec<i32> = temps.into_iter().collect();
            let n = temps.len();
            prop::collection::vec(0.0f32..=100.0, n).prop_map(move |percents| {
                temps
                    .iter()
                    .zip(percents)
                    .map(|(&t, p)| CurvePoint {
                        temperature: t as f32,
                        fan_percent: p,
                    })
                    .collect()
            })
        })
    }

    proptest! {
        #[test]
        fn output_always_within_bounds(
            points in arb_valid_points(),
            temp in -60.0f32..170.0,
            min in 0.0f32..=40.0,
            max in 60.0f32..=100.0,
        ) {
            let mut curve = FanCurve::new("p", "P", points);
            curve.min_percent = min;
            curve.max_percent = max;
            curve.hysteresis = 0.0;
            let out = interpolate(&curve, temp, None);
            prop_assert!(out >= min && out <= max);
            let out = interpolate_linear(&curve, temp, None);
            prop_assert!(out >= min && out <= max);
        }

        #[test]
        fn monotonic_points_give_monotonic_output(
            points in arb_valid_points(),
            steps in 2usize..20,
        ) {
            let mut points = points;
            // force monotonic percents by sorting them onto sorted temps
            points.sort_by(|a, b| a.temperature.partial_cmp(&b.temperature).unwrap());
            let mut percents: Vec<f32> = points.iter().map(|p| p.fan_percent).collect();
            percents.sort_by(|a, b| a.partial_cmp(b).unwrap());
            for (point, percent) in points.iter_mut().zip(percents) {
                point.fan_percent = percent;
            }

            let mut curve = FanCurve::new("p", "P", points);
            curve.hysteresis = 0.0;

            let mut prev = interpolate(&curve, -60.0, None);
            for i in 0..=steps {
                let temp = -60.0 + (230.0 * i as f32 / steps as f32);
                let out = interpolate(&curve, temp, None);
                prop_assert!(out >= prev - 1e-3, "output decreased: {} -> {}", prev, out);
                prev = out;
            }
        }

        #[test]
        fn normalize_then_validate_accepts(points in arb_valid_points()) {
            let curve = FanCurve::new("p", "P", points);
            let normalized = normalize_curve(&curve);
            prop_assert!(validate_curve(&normalized).is_ok());
        }

        #[test]
        fn normalize_idempotent_and_sorted(points in arb_valid_points()) {
            let curve = FanCurve::new("p", "P", points);
            let once = normalize_curve(&curve);
            let twice = normalize_curve(&once);
            prop_assert_eq!(&once.points, &twice.points);
            for pair in once.points.windows(2) {
                prop_assert!(pair[0].temperature < pair[1].temperature);
            }
        }

        #[test]
        fn hysteresis_band_returns_last_exactly(
            last in 0.0f32..=100.0,
            hysteresis in 0.1f32..=10.0,
        ) {
            let mut curve = FanCurve::new("p", "P", vec![
                CurvePoint { temperature: 0.0, fan_percent: 0.0 },
                CurvePoint { temperature: 100.0, fan_percent: 100.0 },
            ]);
            curve.hysteresis = hysteresis;
            curve.interpolation = CurveInterpolation::Linear;
            // raw output at T==last is last itself, so |raw - last| == 0 < hysteresis
            let temp = last.clamp(0.1, 99.9);
            let out = interpolate(&curve, temp, Some(temp));
            prop_assert_eq!(out, temp);
        }

        #[test]
        fn response_never_overshoots(
            current in 0.0f32..=100.0,
            target in 0.0f32..=100.0,
            response in 0.1f32..=30.0,
            delta in 0.01f32..=5.0,
        ) {
            let out = apply_response_time(current, target, response, delta);
            let lo = current.min(target) - 1e-3;
            let hi = current.max(target) + 1e-3;
            prop_assert!(out >= lo && out <= hi, "out {} outside [{}, {}]", out, lo, hi);
        }
    }
}
