//! Derived physical metrics computed from fused scalars.
//!
//! All functions are closed-form and expect finite inputs; callers make sure
//! NaN never reaches them.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::geo_utils::angular_difference;

/// Sea water density (kg/m³).
pub const SEA_WATER_DENSITY: f64 = 1025.0;
/// Gravitational acceleration (m/s²).
pub const GRAVITY: f64 = 9.81;

/// Wave power in kW per metre of crest: `0.5·ρ·g·H²·T / 1000`.
///
/// # Example
/// ```
/// use swell_fusion::derived::wave_power;
/// assert!((wave_power(2.0, 10.0) - 201.1).abs() < 1.0);
/// ```
pub fn wave_power(height: f64, period: f64) -> f64 {
    0.5 * SEA_WATER_DENSITY * GRAVITY * height.powi(2) * period / 1000.0
}

/// Deep-water energy flux in kW/m: `ρ·g²/(64π)·H²·T / 1000`.
///
/// Distinct from [`wave_power`]; both are kept for their respective callers.
pub fn wave_energy_flux(height: f64, period: f64) -> f64 {
    (SEA_WATER_DENSITY * GRAVITY.powi(2) / (64.0 * PI)) * height.powi(2) * period / 1000.0
}

/// Breaking wave height for a given depth (McCowan criterion, 0.78·d).
pub fn estimate_breaking_wave_height(depth: f64) -> f64 {
    0.78 * depth
}

/// Deep-water wave celerity (m/s): `g·T / 2π`.
pub fn wave_celerity(period: f64) -> f64 {
    GRAVITY * period / (2.0 * PI)
}

/// Heuristic surf quality score in `[0, 10]`.
///
/// Additive buckets: height (0–3, best 1–2.5 m), period (0–3, best 10–16 s),
/// wind speed (0–2, falling linearly to zero at 12 m/s) and wind/wave
/// relationship (0–2, best when wind opposes the swell by 150–210°).
/// Only the total is clamped.
pub fn surf_quality_score(
    height: f64,
    period: f64,
    wind_speed: f64,
    wind_direction: Option<f64>,
    wave_direction: Option<f64>,
) -> f64 {
    let mut score = 0.0;

    score += if (1.0..=2.5).contains(&height) {
        3.0
    } else if (0.5..1.0).contains(&height) || (height > 2.5 && height <= 4.0) {
        2.0
    } else if (0.3..0.5).contains(&height) || (height > 4.0 && height <= 6.0) {
        1.0
    } else {
        0.0
    };

    score += if (10.0..=16.0).contains(&period) {
        3.0
    } else if (8.0..10.0).contains(&period) || (period > 16.0 && period <= 20.0) {
        2.0
    } else if (6.0..8.0).contains(&period) {
        1.0
    } else {
        0.0
    };

    if wind_speed < 12.0 {
        score += 2.0 * (1.0 - wind_speed.max(0.0) / 12.0);
    }

    if let (Some(wind), Some(wave)) = (wind_direction, wave_direction) {
        let opposition = angular_difference(wind, wave);
        score += if opposition >= 150.0 {
            2.0
        } else if opposition >= 90.0 {
            1.0
        } else {
            0.0
        };
    }

    score.clamp(0.0, 10.0)
}

/// Wind speed units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedUnit {
    MetersPerSecond,
    MilesPerHour,
    Knots,
    KilometersPerHour,
}

impl SpeedUnit {
    /// Metres per second in one unit.
    fn to_mps_factor(self) -> f64 {
        match self {
            SpeedUnit::MetersPerSecond => 1.0,
            SpeedUnit::MilesPerHour => 0.44704,
            SpeedUnit::Knots => 0.514444,
            SpeedUnit::KilometersPerHour => 1.0 / 3.6,
        }
    }
}

/// Temperature units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

/// Convert a wind speed. Identity when `from == to`.
pub fn convert_wind_speed(value: f64, from: SpeedUnit, to: SpeedUnit) -> f64 {
    if from == to {
        return value;
    }
    let mps = value * from.to_mps_factor();
    if to == SpeedUnit::MetersPerSecond {
        mps
    } else {
        mps / to.to_mps_factor()
    }
}

/// Convert a temperature. Identity when `from == to`.
pub fn convert_temperature(value: f64, from: TemperatureUnit, to: TemperatureUnit) -> f64 {
    match (from, to) {
        (TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius) => (value - 32.0) * 5.0 / 9.0,
        (TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit) => value * 9.0 / 5.0 + 32.0,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_power() {
        assert!((wave_power(2.0, 10.0) - 201.105).abs() < 0.01);
        assert_eq!(wave_power(0.0, 12.0), 0.0);
        // Quadratic in height, linear in period
        let base = wave_power(1.5, 9.0);
        assert!((wave_power(3.0, 9.0) - 4.0 * base).abs() < 1e-9);
        assert!((wave_power(1.5, 18.0) - 2.0 * base).abs() < 1e-9);
    }

    #[test]
    fn test_energy_flux_differs_from_power() {
        let flux = wave_energy_flux(2.0, 10.0);
        // 1025 * 96.2361 / 201.062 * 40 / 1000
        assert!((flux - 19.625).abs() < 0.01, "flux was {}", flux);
        assert!(flux < wave_power(2.0, 10.0));
    }

    #[test]
    fn test_breaking_height_and_celerity() {
        assert!((estimate_breaking_wave_height(2.0) - 1.56).abs() < 1e-12);
        assert!((wave_celerity(10.0) - 15.613).abs() < 0.001);
    }

    #[test]
    fn test_surf_score_bounds() {
        let heights = [0.0, 0.4, 0.8, 1.5, 3.0, 5.0, 9.0];
        let periods = [3.0, 7.0, 9.0, 12.0, 18.0, 25.0];
        let winds = [0.0, 4.0, 11.9, 20.0];
        for &h in &heights {
            for &t in &periods {
                for &w in &winds {
                    let s = surf_quality_score(h, t, w, Some(90.0), Some(270.0));
                    assert!((0.0..=10.0).contains(&s), "score {} out of range", s);
                }
            }
        }
        assert_eq!(surf_quality_score(1.5, 12.0, 0.0, Some(90.0), Some(270.0)), 10.0);
    }

    #[test]
    fn test_offshore_beats_onshore() {
        let offshore = surf_quality_score(1.5, 12.0, 4.0, Some(90.0), Some(270.0));
        let onshore = surf_quality_score(1.5, 12.0, 4.0, Some(270.0), Some(270.0));
        assert!(offshore > onshore);
        let cross = surf_quality_score(1.5, 12.0, 4.0, Some(0.0), Some(270.0));
        assert!(offshore > cross && cross > onshore);
        // Without directions no direction points are awarded
        assert_eq!(surf_quality_score(1.5, 12.0, 4.0, None, Some(270.0)), onshore);
    }

    #[test]
    fn test_wind_speed_conversion() {
        use SpeedUnit::*;
        assert!((convert_wind_speed(10.0, MilesPerHour, MetersPerSecond) - 4.4704).abs() < 1e-12);
        assert!((convert_wind_speed(10.0, Knots, MetersPerSecond) - 5.14444).abs() < 1e-12);
        assert!((convert_wind_speed(36.0, KilometersPerHour, MetersPerSecond) - 10.0).abs() < 1e-12);
        assert!((convert_wind_speed(5.14444, MetersPerSecond, Knots) - 10.0).abs() < 1e-9);
        assert_eq!(convert_wind_speed(7.3, Knots, Knots), 7.3);
    }

    #[test]
    fn test_temperature_conversion() {
        use TemperatureUnit::*;
        assert!(convert_temperature(32.0, Fahrenheit, Celsius).abs() < 1e-12);
        assert!((convert_temperature(-40.0, Fahrenheit, Celsius) + 40.0).abs() < 1e-12);
        assert!((convert_temperature(100.0, Celsius, Fahrenheit) - 212.0).abs() < 1e-12);
        let x = 17.123456789;
        assert_eq!(convert_temperature(x, Celsius, Celsius), x);
        assert_eq!(convert_temperature(x, Fahrenheit, Fahrenheit), x);
    }
}
