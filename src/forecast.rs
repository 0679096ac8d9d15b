//! # Forecast Compiler
//!
//! Builds an hourly forecast for one point by resolving every metric for
//! each hour and deriving wave power, energy flux and a surf score.
//!
//! ## Algorithm
//! 1. Validate the configuration and load station registries once
//! 2. For each hour offset `i` in `[0, hours)`: `time = now + i h`
//! 3. Resolve all metrics for that hour concurrently
//! 4. Derive wave power/energy flux (worst contributing quality) and surf score
//! 5. Hours that fail are dropped and logged; the horizon continues
//! 6. Records come back in ascending hour order with summary metadata

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::derived::{surf_quality_score, wave_energy_flux, wave_power};
use crate::error::{FusionError, Result};
use crate::geo_utils::normalize_longitude;
use crate::hierarchy::{FusedMetric, HierarchyResolver, Metric, ResolverConfig};
use crate::sources::ObservationSource;
use crate::{combine_quality, GeoPoint, QualityFlag};

/// Longest horizon a forecast may request (16 days).
pub const MAX_FORECAST_HOURS: u32 = 384;

/// Configuration for a forecast run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Hours to compile, starting at the current hour. Default: 24
    pub hours: u32,
    pub resolver: ResolverConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            hours: 24,
            resolver: ResolverConfig::default(),
        }
    }
}

impl ForecastConfig {
    pub fn with_hours(hours: u32) -> Self {
        Self {
            hours,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hours > MAX_FORECAST_HOURS {
            return Err(FusionError::config(format!(
                "forecast horizon of {} hours exceeds {}",
                self.hours, MAX_FORECAST_HOURS
            )));
        }
        self.resolver.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FusionError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// A fused value and its quality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub quality: QualityFlag,
}

impl MetricValue {
    /// `None` for missing metrics.
    pub fn from_fused(fused: &FusedMetric) -> Option<Self> {
        fused.value.map(|value| Self {
            value,
            quality: fused.quality,
        })
    }
}

/// One hour of forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub time: DateTime<Utc>,
    pub hour_offset: u32,
    pub wave_height: Option<MetricValue>,
    pub wave_period: Option<MetricValue>,
    pub wave_direction: Option<MetricValue>,
    pub air_temperature: Option<MetricValue>,
    pub wind_speed: Option<MetricValue>,
    pub wind_direction: Option<MetricValue>,
    pub water_temperature: Option<MetricValue>,
    pub tide_level: Option<MetricValue>,
    /// kW per metre of crest
    pub wave_power: Option<MetricValue>,
    /// kW/m
    pub wave_energy_flux: Option<MetricValue>,
    /// 0-10
    pub surf_score: Option<f64>,
    /// Tier trace per metric
    pub provenance: BTreeMap<Metric, Vec<String>>,
}

impl ForecastRecord {
    pub fn get(&self, metric: Metric) -> Option<&MetricValue> {
        match metric {
            Metric::WaveHeight => self.wave_height.as_ref(),
            Metric::WavePeriod => self.wave_period.as_ref(),
            Metric::WaveDirection => self.wave_direction.as_ref(),
            Metric::AirTemperature => self.air_temperature.as_ref(),
            Metric::WindSpeed => self.wind_speed.as_ref(),
            Metric::WindDirection => self.wind_direction.as_ref(),
            Metric::WaterTemperature => self.water_temperature.as_ref(),
            Metric::TideLevel => self.tide_level.as_ref(),
        }
    }
}

/// Summary of a forecast run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetadata {
    pub location: GeoPoint,
    pub generated_at: DateTime<Utc>,
    pub hours_requested: u32,
    pub hours_compiled: u32,
    pub hours_dropped: u32,
    /// Hours whose wave height was a direct reading
    pub primary_hours: u32,
    pub interpolated_hours: u32,
    pub modeled_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub forecasts: Vec<ForecastRecord>,
    pub metadata: ForecastMetadata,
}

impl ForecastResponse {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| FusionError::Internal {
            message: e.to_string(),
        })
    }
}

/// Compile a forecast starting now.
pub async fn compile_forecast<S: ObservationSource>(
    source: &S,
    lat: f64,
    lon: f64,
    config: &ForecastConfig,
) -> Result<ForecastResponse> {
    compile_forecast_at(source, lat, lon, config, Utc::now()).await
}

/// Compile a forecast starting at `now`.
///
/// Fails only on a bad configuration or invalid coordinates. Individual
/// hours that cannot be compiled are dropped.
pub async fn compile_forecast_at<S: ObservationSource>(
    source: &S,
    lat: f64,
    lon: f64,
    config: &ForecastConfig,
    now: DateTime<Utc>,
) -> Result<ForecastResponse> {
    config.validate()?;
    let location = GeoPoint::new(lat, normalize_longitude(lon));
    if !location.is_valid() {
        return Err(FusionError::config(format!(
            "invalid coordinates ({}, {})",
            lat, lon
        )));
    }

    let resolver = HierarchyResolver::prepare(source, config.resolver.clone(), now).await?;
    let hours = join_all(
        (0..config.hours).map(|offset| compile_hour(&resolver, location, now, offset)),
    )
    .await;

    let mut forecasts = Vec::with_capacity(hours.len());
    let mut dropped = 0u32;
    for (offset, result) in hours.into_iter().enumerate() {
        match result {
            Ok(record) => forecasts.push(record),
            Err(e) => {
                warn!("[ForecastCompiler] Dropping hour {}: {}", offset, e);
                dropped += 1;
            }
        }
    }

    let count = |flag: QualityFlag| -> u32 {
        forecasts
            .iter()
            .filter(|r| r.wave_height.map(|v| v.quality) == Some(flag))
            .count() as u32
    };
    let metadata = ForecastMetadata {
        location,
        generated_at: now,
        hours_requested: config.hours,
        hours_compiled: forecasts.len() as u32,
        hours_dropped: dropped,
        primary_hours: count(QualityFlag::Primary),
        interpolated_hours: count(QualityFlag::Interpolated),
        modeled_hours: count(QualityFlag::Modeled),
    };

    info!(
        "[ForecastCompiler] Compiled {}/{} hours for ({:.3}, {:.3}): {} primary, {} interpolated, {} modeled",
        metadata.hours_compiled,
        metadata.hours_requested,
        location.latitude,
        location.longitude,
        metadata.primary_hours,
        metadata.interpolated_hours,
        metadata.modeled_hours
    );

    Ok(ForecastResponse {
        forecasts,
        metadata,
    })
}

async fn compile_hour<S: ObservationSource>(
    resolver: &HierarchyResolver<'_, S>,
    location: GeoPoint,
    now: DateTime<Utc>,
    offset: u32,
) -> Result<ForecastRecord> {
    let time = Duration::try_hours(i64::from(offset))
        .and_then(|d| now.checked_add_signed(d))
        .ok_or(FusionError::TimeOutOfRange {
            offset_hours: offset,
        })?;

    let (lat, lon) = (location.latitude, location.longitude);
    let (height, period, wave_dir, air, wind, wind_dir, water, tide) = futures::join!(
        resolver.resolve_metric(Metric::WaveHeight, lat, lon, time),
        resolver.resolve_metric(Metric::WavePeriod, lat, lon, time),
        resolver.resolve_metric(Metric::WaveDirection, lat, lon, time),
        resolver.resolve_metric(Metric::AirTemperature, lat, lon, time),
        resolver.resolve_metric(Metric::WindSpeed, lat, lon, time),
        resolver.resolve_metric(Metric::WindDirection, lat, lon, time),
        resolver.resolve_metric(Metric::WaterTemperature, lat, lon, time),
        resolver.resolve_metric(Metric::TideLevel, lat, lon, time),
    );

    let (power, flux) = match (height.value, period.value) {
        (Some(h), Some(t)) => {
            let quality = combine_quality(height.quality, period.quality);
            let power = finite(wave_power(h, t), "wave_power")?;
            let flux = finite(wave_energy_flux(h, t), "wave_energy_flux")?;
            (
                Some(MetricValue { value: power, quality }),
                Some(MetricValue { value: flux, quality }),
            )
        }
        _ => (None, None),
    };

    let surf_score = match (height.value, period.value, wind.value) {
        (Some(h), Some(t), Some(ws)) => Some(finite(
            surf_quality_score(h, t, ws, wind_dir.value, wave_dir.value),
            "surf_score",
        )?),
        _ => None,
    };

    let fused = [
        (Metric::WaveHeight, &height),
        (Metric::WavePeriod, &period),
        (Metric::WaveDirection, &wave_dir),
        (Metric::AirTemperature, &air),
        (Metric::WindSpeed, &wind),
        (Metric::WindDirection, &wind_dir),
        (Metric::WaterTemperature, &water),
        (Metric::TideLevel, &tide),
    ];
    let provenance = fused
        .iter()
        .map(|(metric, f)| (*metric, f.source_hierarchy.clone()))
        .collect();

    Ok(ForecastRecord {
        time,
        hour_offset: offset,
        wave_height: MetricValue::from_fused(&height),
        wave_period: MetricValue::from_fused(&period),
        wave_direction: MetricValue::from_fused(&wave_dir),
        air_temperature: MetricValue::from_fused(&air),
        wind_speed: MetricValue::from_fused(&wind),
        wind_direction: MetricValue::from_fused(&wind_dir),
        water_temperature: MetricValue::from_fused(&water),
        tide_level: MetricValue::from_fused(&tide),
        wave_power: power,
        wave_energy_flux: flux,
        surf_score,
        provenance,
    })
}

fn finite(value: f64, field: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FusionError::NonFinite {
            field: field.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{BuoyReading, MemorySource, WeatherReading};
    use crate::stations::Station;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn monterey() -> MemorySource {
        let mut reading = BuoyReading::new("46042", now() - Duration::minutes(40));
        reading.wave_height = Some(1.8);
        reading.dominant_period = Some(12.0);
        reading.wave_direction = Some(290.0);
        reading.water_temp = Some(13.5);

        MemorySource::new()
            .with_buoy(Station::new("46042", "Monterey", 36.785, -122.398), Some(reading))
            .with_weather(WeatherReading {
                source_id: "gfs".to_string(),
                time: now(),
                air_temp: Some(15.0),
                wind_speed: Some(3.0),
                wind_direction: Some(100.0),
                quality: QualityFlag::Modeled,
            })
    }

    #[test]
    fn test_config_horizon_limit() {
        assert!(ForecastConfig::with_hours(MAX_FORECAST_HOURS).validate().is_ok());
        assert!(ForecastConfig::with_hours(MAX_FORECAST_HOURS + 1).validate().is_err());
        assert!(ForecastConfig::from_json_str(r#"{"hours": 48}"#).is_ok());
        assert!(ForecastConfig::from_json_str(r#"{"hours": 1000}"#).is_err());
    }

    #[test]
    fn test_finite_guard() {
        assert_eq!(finite(1.5, "x"), Ok(1.5));
        assert_eq!(
            finite(f64::NAN, "wave_power"),
            Err(FusionError::NonFinite {
                field: "wave_power".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_compile_hours_in_order() {
        let source = monterey();
        let response = compile_forecast_at(&source, 36.80, -122.40, &ForecastConfig::with_hours(6), now())
            .await
            .unwrap();

        assert_eq!(response.forecasts.len(), 6);
        for (i, record) in response.forecasts.iter().enumerate() {
            assert_eq!(record.hour_offset, i as u32);
            assert_eq!(record.time, now() + Duration::hours(i as i64));
        }
        assert_eq!(response.metadata.hours_compiled, 6);
        assert_eq!(response.metadata.hours_dropped, 0);
        assert_eq!(response.metadata.primary_hours, 6);
    }

    #[tokio::test]
    async fn test_derived_metrics_use_worst_quality() {
        let source = monterey();
        let response = compile_forecast_at(&source, 36.80, -122.40, &ForecastConfig::with_hours(1), now())
            .await
            .unwrap();
        let record = &response.forecasts[0];

        let power = record.wave_power.unwrap();
        assert!((power.value - wave_power(1.8, 12.0)).abs() < 1e-9);
        assert_eq!(power.quality, QualityFlag::Primary);
        assert!(record.wave_energy_flux.unwrap().value < power.value);

        // Offshore wind, clean swell
        let score = record.surf_score.unwrap();
        assert!(score > 8.0 && score <= 10.0, "score {}", score);

        assert_eq!(record.tide_level, None);
        assert_eq!(
            record.provenance[&Metric::TideLevel],
            vec!["tide_primary", "tide_interpolation", "no_data"]
        );
        assert_eq!(record.get(Metric::WaterTemperature).unwrap().value, 13.5);
    }

    #[tokio::test]
    async fn test_fallback_quality_propagates_to_power() {
        // Period from the buoy, height only from the climatological constant
        let mut reading = BuoyReading::new("46042", now());
        reading.dominant_period = Some(9.0);
        let source = MemorySource::new()
            .with_buoy(Station::new("46042", "Monterey", 36.785, -122.398), Some(reading));

        let response = compile_forecast_at(&source, 36.80, -122.40, &ForecastConfig::with_hours(1), now())
            .await
            .unwrap();
        let record = &response.forecasts[0];
        assert_eq!(record.wave_height.unwrap().quality, QualityFlag::Historical);
        assert_eq!(record.wave_power.unwrap().quality, QualityFlag::Historical);
        assert_eq!(response.metadata.primary_hours, 0);
    }

    #[tokio::test]
    async fn test_zero_hours_and_bad_coordinates() {
        let source = MemorySource::new();
        let empty = compile_forecast_at(&source, 0.0, 0.0, &ForecastConfig::with_hours(0), now())
            .await
            .unwrap();
        assert!(empty.forecasts.is_empty());

        let err = compile_forecast_at(&source, 91.0, 0.0, &ForecastConfig::default(), now()).await;
        assert!(matches!(err, Err(FusionError::Config { .. })));
    }

    #[tokio::test]
    async fn test_response_serializes() {
        let source = monterey();
        let response = compile_forecast_at(&source, 36.80, -122.40, &ForecastConfig::with_hours(2), now())
            .await
            .unwrap();
        let json = response.to_json().unwrap();
        assert!(json.contains("\"wave_height\""));
        assert!(json.contains("\"buoy_46042_primary\""));
        assert!(json.contains("\"quality\":\"primary\""));
    }
}
