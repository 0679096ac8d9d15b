//! Observation: one candidate value handed to the fusion core.

use serde::{Deserialize, Serialize};

use crate::{QualityFlag, SourceKind};

/// A measured or modelled scalar at a known distance from the query point.
///
/// `value` is never NaN unless `quality` is [`QualityFlag::Missing`];
/// producers filter missing-data markers before building one (see
/// [`crate::sanitize`]). Aggregators skip non-finite values regardless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Wave height (m), period (s), direction (deg), speed (m/s),
    /// temperature (°C) or tide level (m)
    pub value: f64,
    /// Kilometres from the query point (0 for grid values)
    pub distance: f64,
    /// Provenance category
    pub source_kind: SourceKind,
    /// Freshness label assigned by the producer
    pub quality: QualityFlag,
    /// Human-readable source label, e.g. `buoy_46042`
    pub source: String,
    /// Age of the value in milliseconds, when known
    pub age_ms: Option<u64>,
}

impl Observation {
    /// Create an observation with an empty source label.
    pub fn new(value: f64, distance: f64, source_kind: SourceKind, quality: QualityFlag) -> Self {
        Self {
            value,
            distance,
            source_kind,
            quality,
            source: String::new(),
            age_ms: None,
        }
    }

    /// Direct station measurement.
    pub fn observed(value: f64, distance: f64, quality: QualityFlag) -> Self {
        Self::new(value, distance, SourceKind::Observation, quality)
    }

    /// Model output.
    pub fn modeled(value: f64, distance: f64) -> Self {
        Self::new(value, distance, SourceKind::Model, QualityFlag::Modeled)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_age_ms(mut self, age_ms: u64) -> Self {
        self.age_ms = Some(age_ms);
        self
    }

    /// Usable in a weighted computation: finite value, finite non-negative distance.
    pub fn is_usable(&self) -> bool {
        self.value.is_finite() && self.distance.is_finite() && self.distance >= 0.0
    }
}
