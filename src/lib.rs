//! # Swell Fusion
//!
//! Ocean forecast data fusion: turns heterogeneous, partially missing
//! observations (buoys, tide gauges, forecast grids, wave models) into one
//! best-estimate value per metric, each tagged with a quality label and a
//! trace of the sources tried.
//!
//! This library provides:
//! - Inverse-distance and slow-variable spatial interpolation
//! - Weighted ensemble fusion with outlier rejection (circular for directions)
//! - A per-metric source hierarchy with fallbacks that never fails on missing data
//! - Hourly forecast compilation with derived wave power, energy flux and surf score
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel batch ensemble fusion with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use swell_fusion::{combine_ensemble, EnsembleConfig, Observation, QualityFlag};
//!
//! let members = vec![
//!     Observation::observed(2.1, 4.0, QualityFlag::Primary).with_source("buoy_46042"),
//!     Observation::observed(2.4, 18.0, QualityFlag::Primary).with_source("buoy_46026"),
//!     Observation::modeled(2.6, 0.0).with_source("wavewatch"),
//! ];
//!
//! if let Some(result) = combine_ensemble(&members, &EnsembleConfig::default()) {
//!     println!("{:.2} m ({:?} confidence)", result.mean, result.confidence);
//! }
//! ```
//!
//! Forecasts are compiled against an [`ObservationSource`]:
//!
//! ```rust
//! use swell_fusion::{compile_forecast, ForecastConfig, MemorySource};
//!
//! # async fn run() -> swell_fusion::Result<()> {
//! let source = MemorySource::new();
//! let response = compile_forecast(&source, 36.95, -122.02, &ForecastConfig::with_hours(24)).await?;
//! // No stations: every hour falls back to climatology
//! assert_eq!(response.forecasts[0].wave_height.unwrap().value, 1.0);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{FusionError, Result};

// Geographic utilities (distance, angles, longitude conventions)
pub mod geo_utils;

// Quality labels and provenance categories
pub mod quality;
pub use quality::{combine_quality, QualityFlag, SourceKind};

// Labelled observations fed to the combiners
pub mod observation;
pub use observation::Observation;

// Missing-data markers and physical valid ranges
pub mod sanitize;

// Spatial and temporal interpolation
pub mod interpolation;
pub use interpolation::{
    interpolate_slow_variable, interpolate_wave_data, interpolate_wind_data,
    inverse_distance_weighting, temporal_interpolation, Interpolated,
};

// Weighted ensemble fusion
pub mod ensemble;
#[cfg(feature = "parallel")]
pub use ensemble::combine_ensemble_batch_parallel;
pub use ensemble::{
    combine_directions, combine_ensemble, combine_ensemble_batch, Confidence, EnsembleConfig,
    EnsembleResult,
};

// Derived physical metrics and unit conversions
pub mod derived;

// Station registries with an R-tree index
pub mod stations;
pub use stations::{Station, StationIndex};

// External collaborator interface
pub mod sources;
pub use sources::{
    BuoyReading, MemorySource, ModelGridPoint, ObservationSource, TideSample, WeatherReading,
};

// TTL memoisation of collaborator lookups
pub mod cache;
pub use cache::{CacheConfig, CachedSource, TtlCache};

// Per-metric source cascade
pub mod hierarchy;
pub use hierarchy::{FusedMetric, HierarchyResolver, Metric, ResolverConfig};

// Hourly forecast compilation
pub mod forecast;
pub use forecast::{
    compile_forecast, compile_forecast_at, ForecastConfig, ForecastMetadata, ForecastRecord,
    ForecastResponse, MetricValue,
};

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use swell_fusion::GeoPoint;
/// let point = GeoPoint::new(36.95, -122.02); // Santa Cruz
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        geo_utils::distance_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(36.95, -122.02).is_valid());
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(90.1, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 237.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_geo_point_distance() {
        let santa_cruz = GeoPoint::new(36.95, -122.02);
        let monterey = GeoPoint::new(36.60, -121.89);
        let d = santa_cruz.distance_km(&monterey);
        assert!(d > 35.0 && d < 45.0, "distance was {}", d);
        assert_eq!(santa_cruz.distance_km(&santa_cruz), 0.0);
    }
}
