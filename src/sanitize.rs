//! Boundary validation for raw readings.
//!
//! Station feeds mark absent fields with `MM` (or leave them empty) and
//! occasionally report physically impossible values. Both are turned into
//! `None` here so nothing downstream ever sees a sentinel.

use serde::{Deserialize, Serialize};

/// Raw fields reported by marine stations, each with a physical valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingField {
    WaveHeight,
    DominantPeriod,
    AveragePeriod,
    WaveDirection,
    WindSpeed,
    WindDirection,
    WindGust,
    WaterTemp,
    AirTemp,
    Pressure,
}

impl ReadingField {
    /// Inclusive `(min, max)` range outside of which a value is erroneous.
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            ReadingField::WaveHeight => (0.0, 30.0),
            ReadingField::DominantPeriod => (1.0, 30.0),
            ReadingField::AveragePeriod => (1.0, 30.0),
            ReadingField::WaveDirection => (0.0, 360.0),
            ReadingField::WindSpeed => (0.0, 100.0),
            ReadingField::WindDirection => (0.0, 360.0),
            ReadingField::WindGust => (0.0, 150.0),
            ReadingField::WaterTemp => (-5.0, 40.0),
            ReadingField::AirTemp => (-60.0, 60.0),
            ReadingField::Pressure => (850.0, 1100.0),
        }
    }
}

/// Parse a raw token, mapping missing-data markers and garbage to `None`.
pub fn parse_reading(raw: Option<&str>) -> Option<f64> {
    let token = raw?.trim();
    if token.is_empty() || token == "MM" || token == "N/A" {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Keep `value` only if it is finite and inside the field's valid range.
pub fn validate(value: Option<f64>, field: ReadingField) -> Option<f64> {
    let value = value?;
    let (min, max) = field.valid_range();
    if value.is_finite() && value >= min && value <= max {
        Some(value)
    } else {
        None
    }
}

/// Parse and validate in one step.
pub fn parse_field(raw: Option<&str>, field: ReadingField) -> Option<f64> {
    validate(parse_reading(raw), field)
}
