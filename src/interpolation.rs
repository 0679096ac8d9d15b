//! Spatial interpolation engine.
//!
//! Inverse Distance Weighting (IDW) over scalar observations, with tunings
//! for waves, wind and slowly-varying fields, plus linear interpolation in
//! time.
//!
//! ## Algorithm
//! 1. Drop points beyond `max_distance` or with non-finite values
//! 2. Near-field short-circuit: a point closer than 1 km is returned as-is
//! 3. A single remaining point is returned as-is
//! 4. Otherwise `value = Σ(vᵢ·wᵢ) / Σwᵢ` with `wᵢ = 1 / dᵢ^power`

use serde::{Deserialize, Serialize};

use crate::{Observation, QualityFlag};

/// Default IDW exponent.
pub const DEFAULT_POWER: f64 = 2.0;
/// Default IDW cutoff (km).
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 100.0;
/// Points closer than this are returned verbatim (km).
pub const NEAR_FIELD_KM: f64 = 1.0;
/// Cutoff for slow-variable averaging (km).
pub const SLOW_VARIABLE_RADIUS_KM: f64 = 200.0;
/// Default maximum age for slow-variable points (24 h).
pub const DEFAULT_MAX_AGE_MS: u64 = 86_400_000;

/// Value and quality produced by an interpolator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interpolated {
    pub value: f64,
    pub quality: QualityFlag,
}

/// Inverse Distance Weighting over `points`.
///
/// Returns `None` when no point survives the distance/validity filter.
/// Two points at exactly equal distance receive exactly equal weight.
pub fn inverse_distance_weighting(
    points: &[Observation],
    power: f64,
    max_distance: f64,
) -> Option<Interpolated> {
    let valid: Vec<&Observation> = points
        .iter()
        .filter(|p| p.is_usable() && p.distance <= max_distance)
        .collect();

    if valid.is_empty() {
        return None;
    }

    // Near-field: avoid weight blow-up as distance -> 0
    if let Some(near) = valid.iter().find(|p| p.distance < NEAR_FIELD_KM) {
        return Some(Interpolated {
            value: near.value,
            quality: near.quality,
        });
    }

    if valid.len() == 1 {
        return Some(Interpolated {
            value: valid[0].value,
            quality: valid[0].quality,
        });
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for p in &valid {
        let weight = 1.0 / p.distance.powf(power);
        weighted_sum += p.value * weight;
        total_weight += weight;
    }

    let value = weighted_sum / total_weight;
    if !value.is_finite() {
        return None;
    }

    let quality = if valid.iter().any(|p| p.quality == QualityFlag::Primary) {
        QualityFlag::Interpolated
    } else {
        QualityFlag::Modeled
    };

    Some(Interpolated { value, quality })
}

/// IDW tuned for wave fields.
///
/// Near shore (< 10 km) local bathymetry dominates, so nearer points are
/// favoured more strongly and the cutoff is tighter.
pub fn interpolate_wave_data(
    points: &[Observation],
    distance_to_shore_km: f64,
) -> Option<Interpolated> {
    if distance_to_shore_km < 10.0 {
        inverse_distance_weighting(points, 3.0, 50.0)
    } else {
        inverse_distance_weighting(points, DEFAULT_POWER, DEFAULT_MAX_DISTANCE_KM)
    }
}

/// IDW tuned for wind fields.
///
/// Within 5 km of the coast only readings closer than 20 km are trusted.
pub fn interpolate_wind_data(
    points: &[Observation],
    distance_to_shore_km: f64,
) -> Option<Interpolated> {
    if distance_to_shore_km < 5.0 {
        let local: Vec<Observation> = points
            .iter()
            .filter(|p| p.distance < 20.0)
            .cloned()
            .collect();
        if local.is_empty() {
            return None;
        }
        inverse_distance_weighting(&local, DEFAULT_POWER, 20.0)
    } else {
        inverse_distance_weighting(points, DEFAULT_POWER, 50.0)
    }
}

/// Plain arithmetic mean for slowly varying fields (water temperature).
///
/// Uses points within `radius_km` (normally [`SLOW_VARIABLE_RADIUS_KM`]) with
/// finite values; points whose age is known and exceeds `max_age_ms` are
/// skipped. Quality is always [`QualityFlag::Interpolated`].
pub fn interpolate_slow_variable(
    points: &[Observation],
    radius_km: f64,
    max_age_ms: u64,
) -> Option<Interpolated> {
    let values: Vec<f64> = points
        .iter()
        .filter(|p| p.is_usable() && p.distance <= radius_km)
        .filter(|p| p.age_ms.map_or(true, |age| age <= max_age_ms))
        .map(|p| p.value)
        .collect();

    if values.is_empty() {
        return None;
    }

    Some(Interpolated {
        value: values.iter().sum::<f64>() / values.len() as f64,
        quality: QualityFlag::Interpolated,
    })
}

/// Linear interpolation by elapsed-time fraction (times in ms).
///
/// Extrapolates outside `[time1, time2]`; callers bound-check. When both
/// timestamps coincide `value1` is returned.
pub fn temporal_interpolation(value1: f64, time1: i64, value2: f64, time2: i64, target: i64) -> f64 {
    if time1 == time2 {
        return value1;
    }
    let ratio = (target - time1) as f64 / (time2 - time1) as f64;
    value1 + (value2 - value1) * ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceKind;

    fn obs(value: f64, distance: f64) -> Observation {
        Observation::observed(value, distance, QualityFlag::Primary)
    }

    fn modeled(value: f64, distance: f64) -> Observation {
        Observation::new(value, distance, SourceKind::Model, QualityFlag::Modeled)
    }

    #[test]
    fn test_equidistant_points_average_exactly() {
        let result = inverse_distance_weighting(&[obs(1.0, 2.0), obs(3.0, 2.0)], 2.0, 100.0).unwrap();
        assert_eq!(result.value, 2.0);

        let (a, b) = (1.37, 2.91);
        let result = inverse_distance_weighting(&[obs(a, 17.0), obs(b, 17.0)], 2.0, 100.0).unwrap();
        assert!((result.value - (a + b) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_near_field_short_circuit() {
        let points = [obs(5.0, 30.0), modeled(2.5, 0.4), obs(9.0, 10.0)];
        let result = inverse_distance_weighting(&points, 2.0, 100.0).unwrap();
        assert_eq!(result.value, 2.5);
        assert_eq!(result.quality, QualityFlag::Modeled);
    }

    #[test]
    fn test_single_point_verbatim() {
        let points = [obs(1.7, 40.0), obs(4.0, 150.0)];
        let result = inverse_distance_weighting(&points, 2.0, 100.0).unwrap();
        assert_eq!(result.value, 1.7);
        assert_eq!(result.quality, QualityFlag::Primary);
    }

    #[test]
    fn test_higher_power_pulls_toward_nearer_point() {
        let points = [obs(1.0, 10.0), obs(3.0, 30.0)];
        let p1 = inverse_distance_weighting(&points, 1.0, 100.0).unwrap().value;
        let p2 = inverse_distance_weighting(&points, 2.0, 100.0).unwrap().value;
        let p3 = inverse_distance_weighting(&points, 3.0, 100.0).unwrap().value;
        assert!((p2 - 1.0).abs() < (p1 - 1.0).abs());
        assert!((p3 - 1.0).abs() < (p2 - 1.0).abs());
    }

    #[test]
    fn test_all_points_beyond_cutoff() {
        let points = [obs(1.0, 120.0), obs(2.0, 180.0)];
        assert!(inverse_distance_weighting(&points, 2.0, 100.0).is_none());
        assert!(inverse_distance_weighting(&[], 2.0, 100.0).is_none());
    }

    #[test]
    fn test_nan_values_are_ignored() {
        let points = [obs(f64::NAN, 5.0), obs(2.0, 20.0)];
        let result = inverse_distance_weighting(&points, 2.0, 100.0).unwrap();
        assert_eq!(result.value, 2.0);
    }

    #[test]
    fn test_quality_depends_on_primary_contributors() {
        let mixed = [obs(1.0, 10.0), modeled(2.0, 20.0)];
        assert_eq!(
            inverse_distance_weighting(&mixed, 2.0, 100.0).unwrap().quality,
            QualityFlag::Interpolated
        );

        let models = [modeled(1.0, 10.0), modeled(2.0, 20.0)];
        assert_eq!(
            inverse_distance_weighting(&models, 2.0, 100.0).unwrap().quality,
            QualityFlag::Modeled
        );
    }

    #[test]
    fn test_wave_tuning_near_shore() {
        let points = [obs(1.0, 20.0), obs(2.0, 70.0)];
        // Offshore: both points used
        let offshore = interpolate_wave_data(&points, 25.0).unwrap();
        assert!(offshore.value > 1.0 && offshore.value < 2.0);
        // Near shore: 50 km cutoff leaves only the first point
        let nearshore = interpolate_wave_data(&points, 3.0).unwrap();
        assert_eq!(nearshore.value, 1.0);
    }

    #[test]
    fn test_wind_tuning_near_shore() {
        let points = [obs(6.0, 25.0), obs(8.0, 40.0)];
        assert!(interpolate_wind_data(&points, 2.0).is_none());
        assert!(interpolate_wind_data(&points, 12.0).is_some());

        let with_local = [obs(4.0, 12.0), obs(8.0, 40.0)];
        assert_eq!(interpolate_wind_data(&with_local, 2.0).unwrap().value, 4.0);
    }

    #[test]
    fn test_slow_variable_excludes_far_points() {
        let points = [obs(15.0, 50.0), obs(20.0, 250.0)];
        let result = interpolate_slow_variable(&points, SLOW_VARIABLE_RADIUS_KM, DEFAULT_MAX_AGE_MS).unwrap();
        assert_eq!(result.value, 15.0);
        assert_eq!(result.quality, QualityFlag::Interpolated);

        // A wider radius takes the far point in
        let wide = interpolate_slow_variable(&points, 300.0, DEFAULT_MAX_AGE_MS).unwrap();
        assert_eq!(wide.value, 17.5);
    }

    #[test]
    fn test_slow_variable_is_unweighted_and_age_aware() {
        let points = [
            obs(14.0, 5.0),
            modeled(18.0, 190.0),
            obs(30.0, 20.0).with_age_ms(DEFAULT_MAX_AGE_MS + 1),
        ];
        let result = interpolate_slow_variable(&points, SLOW_VARIABLE_RADIUS_KM, DEFAULT_MAX_AGE_MS).unwrap();
        assert_eq!(result.value, 16.0);
        assert!(
            interpolate_slow_variable(&[obs(f64::NAN, 1.0)], SLOW_VARIABLE_RADIUS_KM, DEFAULT_MAX_AGE_MS).is_none()
        );
    }

    #[test]
    fn test_temporal_interpolation() {
        assert_eq!(temporal_interpolation(1.0, 0, 3.0, 3_600_000, 1_800_000), 2.0);
        // Extrapolates without clamping
        assert_eq!(temporal_interpolation(1.0, 0, 3.0, 1000, 2000), 5.0);
        assert_eq!(temporal_interpolation(1.0, 0, 3.0, 1000, -1000), -1.0);
        assert_eq!(temporal_interpolation(4.2, 500, 9.9, 500, 900), 4.2);
    }
}
