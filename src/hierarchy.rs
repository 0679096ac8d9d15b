//! # Source Hierarchy Resolver
//!
//! Resolves one metric at one point and time by walking a fixed cascade of
//! tiers, best source first, and recording the name of every tier it tries.
//!
//! ## Algorithm
//! 1. Build the cascade for the metric (see [`cascade`])
//! 2. Evaluate tiers left to right; the first tier that yields a value wins
//! 3. Every tier attempted is appended to `source_hierarchy`, so the trace
//!    always ends with the tier that produced the result
//! 4. Terminal tiers (`fallback`, `no_data`) always succeed
//!
//! Collaborator errors never escape: an `Err` from the [`ObservationSource`]
//! is logged and treated as "this source has no value".

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::ensemble::{combine_directions, combine_ensemble, EnsembleConfig, EnsembleResult};
use crate::error::{FusionError, Result};
use crate::geo_utils::distance_km;
use crate::interpolation::{
    interpolate_slow_variable, interpolate_wave_data, interpolate_wind_data,
    inverse_distance_weighting, temporal_interpolation, Interpolated, DEFAULT_MAX_AGE_MS,
    DEFAULT_POWER,
};
use crate::sources::{ObservationSource, TideSample, WeatherReading};
use crate::stations::{NearbyStation, Station, StationIndex};
use crate::{combine_quality, Observation, QualityFlag};

/// The fused quantities a forecast is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Significant wave height (m)
    WaveHeight,
    /// Wave period (s)
    WavePeriod,
    /// Wave direction (deg)
    WaveDirection,
    /// Air temperature (°C)
    AirTemperature,
    /// Wind speed (m/s)
    WindSpeed,
    /// Wind direction (deg)
    WindDirection,
    /// Water temperature (°C)
    WaterTemperature,
    /// Tide level (m)
    TideLevel,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::WaveHeight,
        Metric::WavePeriod,
        Metric::WaveDirection,
        Metric::AirTemperature,
        Metric::WindSpeed,
        Metric::WindDirection,
        Metric::WaterTemperature,
        Metric::TideLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::WaveHeight => "wave_height",
            Metric::WavePeriod => "wave_period",
            Metric::WaveDirection => "wave_direction",
            Metric::AirTemperature => "air_temperature",
            Metric::WindSpeed => "wind_speed",
            Metric::WindDirection => "wind_direction",
            Metric::WaterTemperature => "water_temperature",
            Metric::TideLevel => "tide_level",
        }
    }

    /// Directions are fused with circular statistics.
    pub fn is_direction(&self) -> bool {
        matches!(self, Metric::WaveDirection | Metric::WindDirection)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving one metric.
///
/// `value` is `None` only when `quality` is [`QualityFlag::Missing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedMetric {
    pub value: Option<f64>,
    pub quality: QualityFlag,
    /// Human-readable provenance
    pub source: String,
    /// Every tier attempted, in order; never empty
    pub source_hierarchy: Vec<String>,
}

impl FusedMetric {
    pub fn is_missing(&self) -> bool {
        self.quality == QualityFlag::Missing
    }

    /// The tier that produced a real value, if any.
    pub fn resolved_by(&self) -> Option<&str> {
        match self.source_hierarchy.last().map(String::as_str) {
            Some(TIER_FALLBACK) | Some(TIER_NO_DATA) | None => None,
            Some(tier) => Some(tier),
        }
    }
}

const TIER_FALLBACK: &str = "fallback";
const TIER_NO_DATA: &str = "no_data";

/// One step of a cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tier {
    /// Nearest buoy within the primary radius
    BuoyPrimary,
    /// Several nearby buoys fused with the metric's interpolator
    BuoyInterpolation,
    /// Wave-model grid fused with nearby buoys
    WaveModel,
    /// Forecast-grid value at the point
    WeatherGrid,
    /// Wind direction standing in for wave direction
    WindDirectionFallback,
    /// Nearest tide gauge, interpolated in time
    TidePrimary,
    /// Several nearby tide gauges
    TideInterpolation,
    /// Climatological constant
    Fallback(f64),
    /// Terminal missing value
    NoData,
}

/// Climatological constants used when every live source fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackValues {
    /// Default: 1.0 m
    pub wave_height: f64,
    /// Default: 10.0 s
    pub wave_period: f64,
    /// Default: 5.0 m/s
    pub wind_speed: f64,
}

impl Default for FallbackValues {
    fn default() -> Self {
        Self {
            wave_height: 1.0,
            wave_period: 10.0,
            wind_speed: 5.0,
        }
    }
}

/// Configuration for the hierarchy resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Radius for the single nearest buoy (km). Default: 50
    pub buoy_primary_radius_km: f64,
    /// Radius for buoy interpolation (km). Default: 100
    pub buoy_secondary_radius_km: f64,
    /// Radius for the nearest tide gauge (km). Default: 100
    pub tide_primary_radius_km: f64,
    /// Radius for tide interpolation (km). Default: 150
    pub tide_secondary_radius_km: f64,
    /// Radius for water temperature averaging (km). Default: 200
    pub slow_variable_radius_km: f64,
    /// Sources needed for an interpolation tier. Default: 2
    pub min_secondary_sources: usize,
    /// Sources consulted by an interpolation tier. Default: 5
    pub max_secondary_sources: usize,
    /// Buoy readings older than this are labelled stale. Default: 3
    pub stale_after_hours: u32,
    pub fallback: FallbackValues,
    pub ensemble: EnsembleConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            buoy_primary_radius_km: 50.0,
            buoy_secondary_radius_km: 100.0,
            tide_primary_radius_km: 100.0,
            tide_secondary_radius_km: 150.0,
            slow_variable_radius_km: 200.0,
            min_secondary_sources: 2,
            max_secondary_sources: 5,
            stale_after_hours: 3,
            fallback: FallbackValues::default(),
            ensemble: EnsembleConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        let radii = [
            self.buoy_primary_radius_km,
            self.buoy_secondary_radius_km,
            self.tide_primary_radius_km,
            self.tide_secondary_radius_km,
            self.slow_variable_radius_km,
        ];
        if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(FusionError::config("radii must be finite and positive"));
        }
        if self.buoy_primary_radius_km > self.buoy_secondary_radius_km
            || self.tide_primary_radius_km > self.tide_secondary_radius_km
        {
            return Err(FusionError::config(
                "primary radius must not exceed secondary radius",
            ));
        }
        if self.min_secondary_sources < 1 || self.min_secondary_sources > self.max_secondary_sources {
            return Err(FusionError::config(
                "secondary sources must satisfy 1 <= min <= max",
            ));
        }
        let f = &self.fallback;
        if ![f.wave_height, f.wave_period, f.wind_speed]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(FusionError::config("fallback values must be finite"));
        }
        self.ensemble.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FusionError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// The ordered tiers tried for `metric`.
pub fn cascade(metric: Metric, fallback: &FallbackValues) -> Vec<Tier> {
    use Tier::*;
    match metric {
        Metric::WaveHeight => vec![
            BuoyPrimary,
            BuoyInterpolation,
            WaveModel,
            Fallback(fallback.wave_height),
        ],
        Metric::WavePeriod => vec![
            BuoyPrimary,
            BuoyInterpolation,
            WaveModel,
            Fallback(fallback.wave_period),
        ],
        Metric::WaveDirection => vec![
            BuoyPrimary,
            BuoyInterpolation,
            WaveModel,
            WindDirectionFallback,
            NoData,
        ],
        Metric::AirTemperature => vec![WeatherGrid, BuoyInterpolation, NoData],
        Metric::WindSpeed => vec![WeatherGrid, BuoyInterpolation, Fallback(fallback.wind_speed)],
        Metric::WindDirection => vec![WeatherGrid, BuoyInterpolation, NoData],
        Metric::WaterTemperature => vec![BuoyPrimary, BuoyInterpolation, NoData],
        Metric::TideLevel => vec![TidePrimary, TideInterpolation, NoData],
    }
}

/// What a tier produced: its trace name and, on success, the value.
struct TierOutcome {
    name: String,
    resolved: Option<Resolved>,
}

struct Resolved {
    value: f64,
    quality: QualityFlag,
    source: String,
}

impl TierOutcome {
    fn failed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: None,
        }
    }

    fn resolved(name: impl Into<String>, value: f64, quality: QualityFlag, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: Some(Resolved {
                value,
                quality,
                source: source.into(),
            }),
        }
    }
}

/// Per-call lookups shared between the tiers of one cascade.
struct Lookup {
    metric: Metric,
    lat: f64,
    lon: f64,
    time: DateTime<Utc>,
    weather: Option<Option<WeatherReading>>,
    nearby_buoys: Option<Vec<Observation>>,
}

/// Resolves metrics against a prepared set of station registries.
pub struct HierarchyResolver<'a, S> {
    source: &'a S,
    config: ResolverConfig,
    now: DateTime<Utc>,
    buoys: StationIndex,
    tides: StationIndex,
}

impl<'a, S: ObservationSource> HierarchyResolver<'a, S> {
    /// Validate `config` and load the station registries.
    ///
    /// Registry failures leave the registry empty; only a bad configuration
    /// is an error.
    pub async fn prepare(source: &'a S, config: ResolverConfig, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;

        let (buoys, tides) = futures::join!(source.buoy_stations(), source.tide_stations());
        let buoys = registry_or_empty("buoy", buoys);
        let tides = registry_or_empty("tide", tides);
        debug!(
            "[HierarchyResolver] Prepared {} buoys, {} tide stations",
            buoys.len(),
            tides.len()
        );

        Ok(Self {
            source,
            config,
            now,
            buoys: StationIndex::new(buoys),
            tides: StationIndex::new(tides),
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Reference time for staleness.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Resolve `metric` at a point and time. Never fails.
    pub async fn resolve_metric(&self, metric: Metric, lat: f64, lon: f64, time: DateTime<Utc>) -> FusedMetric {
        let mut lookup = Lookup {
            metric,
            lat,
            lon,
            time,
            weather: None,
            nearby_buoys: None,
        };
        let mut hierarchy = Vec::new();

        for tier in cascade(metric, &self.config.fallback) {
            let outcome = self.attempt(tier, &mut lookup).await;
            hierarchy.push(outcome.name);
            if let Some(resolved) = outcome.resolved {
                debug!(
                    "[HierarchyResolver] {} at ({:.3}, {:.3}) resolved by {}",
                    metric,
                    lat,
                    lon,
                    hierarchy.last().map(String::as_str).unwrap_or_default()
                );
                return FusedMetric {
                    value: Some(resolved.value),
                    quality: resolved.quality,
                    source: resolved.source,
                    source_hierarchy: hierarchy,
                };
            }
        }

        // Only a cascade ending in NoData lands here
        if hierarchy.last().map(String::as_str) != Some(TIER_NO_DATA) {
            hierarchy.push(TIER_NO_DATA.to_string());
        }
        FusedMetric {
            value: None,
            quality: QualityFlag::Missing,
            source: "no data".to_string(),
            source_hierarchy: hierarchy,
        }
    }

    async fn attempt(&self, tier: Tier, lookup: &mut Lookup) -> TierOutcome {
        match tier {
            Tier::BuoyPrimary => self.buoy_primary(lookup).await,
            Tier::BuoyInterpolation => self.buoy_interpolation(lookup).await,
            Tier::WaveModel => self.wave_model(lookup).await,
            Tier::WeatherGrid => self.weather_grid(lookup).await,
            Tier::WindDirectionFallback => self.wind_direction_fallback(lookup).await,
            Tier::TidePrimary => self.tide_primary(lookup).await,
            Tier::TideInterpolation => self.tide_interpolation(lookup).await,
            Tier::Fallback(value) => {
                TierOutcome::resolved(TIER_FALLBACK, value, QualityFlag::Historical, "historical average")
            }
            Tier::NoData => TierOutcome::failed(TIER_NO_DATA),
        }
    }

    async fn buoy_primary(&self, lookup: &mut Lookup) -> TierOutcome {
        let Some(nearest) = self
            .buoys
            .nearest_within(lookup.lat, lookup.lon, self.config.buoy_primary_radius_km)
        else {
            return TierOutcome::failed("buoy_primary");
        };

        let name = format!("buoy_{}_primary", nearest.station.id);
        match self.buoy_observation(nearest, lookup.metric).await {
            Some(obs) => TierOutcome::resolved(
                name,
                obs.value,
                obs.quality,
                format!("{} ({:.1} km)", nearest.station.name, nearest.distance_km),
            ),
            None => TierOutcome::failed(name),
        }
    }

    async fn buoy_interpolation(&self, lookup: &mut Lookup) -> TierOutcome {
        const NAME: &str = "buoy_interpolation";

        let observations = self.nearby_buoy_observations(lookup).await;
        if observations.len() < self.config.min_secondary_sources {
            return TierOutcome::failed(NAME);
        }

        let fused = match lookup.metric {
            Metric::WaveHeight | Metric::WavePeriod => {
                let shore = self.distance_to_shore(lookup.lat, lookup.lon).await;
                interpolate_wave_data(&observations, shore)
            }
            Metric::WindSpeed => {
                let shore = self.distance_to_shore(lookup.lat, lookup.lon).await;
                interpolate_wind_data(&observations, shore)
            }
            Metric::WaveDirection | Metric::WindDirection => {
                // A fused direction is never better than interpolated
                combine_directions(&observations, &self.config.ensemble).map(|r| Interpolated {
                    value: r.mean,
                    quality: combine_quality(r.quality, QualityFlag::Interpolated),
                })
            }
            Metric::WaterTemperature => interpolate_slow_variable(
                &observations,
                self.config.slow_variable_radius_km,
                DEFAULT_MAX_AGE_MS,
            ),
            Metric::AirTemperature | Metric::TideLevel => inverse_distance_weighting(
                &observations,
                DEFAULT_POWER,
                self.config.buoy_secondary_radius_km,
            ),
        };

        match fused {
            Some(result) => TierOutcome::resolved(
                NAME,
                result.value,
                result.quality,
                format!("{} nearby buoys", observations.len()),
            ),
            None => TierOutcome::failed(NAME),
        }
    }

    async fn wave_model(&self, lookup: &mut Lookup) -> TierOutcome {
        const NAME: &str = "wavewatch_model";

        let points = match self
            .source
            .wave_model_points(lookup.lat, lookup.lon, lookup.time)
            .await
        {
            Ok(points) => points,
            Err(e) => {
                warn!("[HierarchyResolver] Wave model unavailable: {}", e);
                return TierOutcome::failed(NAME);
            }
        };

        let mut model: Vec<Observation> = points
            .iter()
            .filter_map(|p| {
                let value = p.value(lookup.metric)?;
                let distance = distance_km(lookup.lat, lookup.lon, p.lat, p.normalized_lon());
                Some(Observation::modeled(value, distance).with_source("wavewatch"))
            })
            .filter(Observation::is_usable)
            .collect();
        if model.is_empty() {
            return TierOutcome::failed(NAME);
        }
        model.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let mut members = model.clone();
        members.extend(self.nearby_buoy_observations(lookup).await);

        let combined: Option<EnsembleResult> = if lookup.metric.is_direction() {
            combine_directions(&members, &self.config.ensemble)
        } else {
            combine_ensemble(&members, &self.config.ensemble)
        };

        match combined {
            Some(result) => TierOutcome::resolved(
                NAME,
                result.mean,
                result.quality,
                format!(
                    "wave model ensemble ({} members, {:?} confidence)",
                    result.member_count, result.confidence
                ),
            ),
            None => {
                let nearest = &model[0];
                TierOutcome::resolved(NAME, nearest.value, QualityFlag::Modeled, "wave model")
            }
        }
    }

    async fn weather_grid(&self, lookup: &mut Lookup) -> TierOutcome {
        let metric = lookup.metric;
        match self.weather(lookup).await {
            Some(reading) => {
                let name = format!("weather_{}_primary", reading.source_id);
                match reading.value(metric) {
                    Some(value) => {
                        let source = format!("{} forecast grid", reading.source_id);
                        TierOutcome::resolved(name, value, reading.quality, source)
                    }
                    None => TierOutcome::failed(name),
                }
            }
            None => TierOutcome::failed("weather_grid_primary"),
        }
    }

    async fn wind_direction_fallback(&self, lookup: &mut Lookup) -> TierOutcome {
        const NAME: &str = "wind_direction_fallback";
        let direction = self
            .weather(lookup)
            .await
            .and_then(|w| w.value(Metric::WindDirection).map(|v| (v, w.source_id)));
        match direction {
            Some((value, source_id)) => TierOutcome::resolved(
                NAME,
                value,
                QualityFlag::Interpolated,
                format!("{} wind direction", source_id),
            ),
            None => TierOutcome::failed(NAME),
        }
    }

    async fn tide_primary(&self, lookup: &mut Lookup) -> TierOutcome {
        let Some(nearest) = self
            .tides
            .nearest_within(lookup.lat, lookup.lon, self.config.tide_primary_radius_km)
        else {
            return TierOutcome::failed("tide_primary");
        };

        let name = format!("tide_{}_primary", nearest.station.id);
        match self.tide_level(nearest.station, lookup.time).await {
            Some(level) => TierOutcome::resolved(
                name,
                level,
                QualityFlag::Primary,
                format!("{} predictions", nearest.station.name),
            ),
            None => TierOutcome::failed(name),
        }
    }

    async fn tide_interpolation(&self, lookup: &mut Lookup) -> TierOutcome {
        const NAME: &str = "tide_interpolation";

        let radius = self.config.tide_secondary_radius_km;
        let nearby: Vec<NearbyStation<'_>> = self
            .tides
            .within(lookup.lat, lookup.lon, radius)
            .into_iter()
            .take(self.config.max_secondary_sources)
            .collect();

        let time = lookup.time;
        let levels = join_all(nearby.iter().map(|n| self.tide_level(n.station, time))).await;
        let observations: Vec<Observation> = nearby
            .iter()
            .zip(levels)
            .filter_map(|(n, level)| {
                level.map(|v| {
                    Observation::observed(v, n.distance_km, QualityFlag::Primary)
                        .with_source(format!("tide_{}", n.station.id))
                })
            })
            .collect();

        if observations.len() < self.config.min_secondary_sources {
            return TierOutcome::failed(NAME);
        }
        match inverse_distance_weighting(&observations, DEFAULT_POWER, radius) {
            Some(result) => TierOutcome::resolved(
                NAME,
                result.value,
                result.quality,
                format!("{} nearby tide stations", observations.len()),
            ),
            None => TierOutcome::failed(NAME),
        }
    }

    /// Latest reading of one buoy as an observation of `metric`.
    async fn buoy_observation(&self, nearby: NearbyStation<'_>, metric: Metric) -> Option<Observation> {
        let reading = match self.source.latest_buoy_reading(&nearby.station.id).await {
            Ok(Some(reading)) => reading.sanitized(),
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    "[HierarchyResolver] Buoy {} unavailable: {}",
                    nearby.station.id, e
                );
                return None;
            }
        };

        let value = reading.value(metric)?;
        let stale_after = Duration::hours(i64::from(self.config.stale_after_hours));
        let quality = QualityFlag::for_reading_age(reading.observed_at, self.now, stale_after);
        let age_ms = (self.now - reading.observed_at).num_milliseconds().max(0) as u64;

        Some(
            Observation::observed(value, nearby.distance_km, quality)
                .with_source(format!("buoy_{}", nearby.station.id))
                .with_age_ms(age_ms),
        )
    }

    /// Valid observations from the nearest buoys, fetched once per lookup.
    async fn nearby_buoy_observations(&self, lookup: &mut Lookup) -> Vec<Observation> {
        if let Some(cached) = &lookup.nearby_buoys {
            return cached.clone();
        }

        let radius = if lookup.metric == Metric::WaterTemperature {
            self.config.slow_variable_radius_km
        } else {
            self.config.buoy_secondary_radius_km
        };
        let nearby: Vec<NearbyStation<'_>> = self
            .buoys
            .within(lookup.lat, lookup.lon, radius)
            .into_iter()
            .take(self.config.max_secondary_sources)
            .collect();

        let metric = lookup.metric;
        let observations: Vec<Observation> =
            join_all(nearby.into_iter().map(|n| self.buoy_observation(n, metric)))
                .await
                .into_iter()
                .flatten()
                .collect();

        lookup.nearby_buoys = Some(observations.clone());
        observations
    }

    /// Forecast-grid reading, fetched once per lookup.
    async fn weather(&self, lookup: &mut Lookup) -> Option<WeatherReading> {
        if let Some(cached) = &lookup.weather {
            return cached.clone();
        }
        let reading = match self.source.weather_at(lookup.lat, lookup.lon, lookup.time).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("[HierarchyResolver] Weather grid unavailable: {}", e);
                None
            }
        };
        lookup.weather = Some(reading.clone());
        reading
    }

    /// Unknown distance to shore is treated as offshore.
    async fn distance_to_shore(&self, lat: f64, lon: f64) -> f64 {
        match self.source.distance_to_shore_km(lat, lon).await {
            Ok(Some(km)) if km.is_finite() => km,
            Ok(_) => f64::INFINITY,
            Err(e) => {
                warn!("[HierarchyResolver] Shore distance unavailable: {}", e);
                f64::INFINITY
            }
        }
    }

    /// Tide level of one station at `time`, without extrapolation.
    async fn tide_level(&self, station: &Station, time: DateTime<Utc>) -> Option<f64> {
        match self.source.tide_predictions(&station.id, time).await {
            Ok(samples) => level_at(&samples, time),
            Err(e) => {
                warn!("[HierarchyResolver] Tide station {} unavailable: {}", station.id, e);
                None
            }
        }
    }
}

fn registry_or_empty(kind: &str, registry: Result<Vec<Station>>) -> Vec<Station> {
    registry.unwrap_or_else(|e| {
        warn!("[HierarchyResolver] {} registry unavailable: {}", kind, e);
        Vec::new()
    })
}

/// Level at `time` from samples in ascending time order.
///
/// Interpolates linearly between the bracketing samples; `None` when `time`
/// lies outside the series.
pub fn level_at(samples: &[TideSample], time: DateTime<Utc>) -> Option<f64> {
    let valid: Vec<&TideSample> = samples.iter().filter(|s| s.level.is_finite()).collect();
    let after = valid.iter().position(|s| s.time >= time)?;
    let next = valid[after];
    if next.time == time {
        return Some(next.level);
    }
    let prev = valid[..after].last()?;
    Some(temporal_interpolation(
        prev.level,
        prev.time.timestamp_millis(),
        next.level,
        next.time.timestamp_millis(),
        time.timestamp_millis(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{BuoyReading, MemorySource, ModelGridPoint};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn reading(id: &str, height: f64, hours_old: i64) -> BuoyReading {
        let mut r = BuoyReading::new(id, now() - Duration::hours(hours_old));
        r.wave_height = Some(height);
        r
    }

    #[test]
    fn test_cascades_end_in_terminal_tier() {
        let fallback = FallbackValues::default();
        for metric in Metric::ALL {
            let tiers = cascade(metric, &fallback);
            assert!(matches!(
                tiers.last(),
                Some(Tier::Fallback(_)) | Some(Tier::NoData)
            ));
        }
        assert_eq!(
            cascade(Metric::WindSpeed, &fallback).last(),
            Some(&Tier::Fallback(5.0))
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(ResolverConfig::default().validate().is_ok());

        let mut config = ResolverConfig::default();
        config.buoy_primary_radius_km = 200.0;
        assert!(config.validate().is_err());

        let mut config = ResolverConfig::default();
        config.min_secondary_sources = 6;
        assert!(config.validate().is_err());

        let mut config = ResolverConfig::default();
        config.ensemble.min_members = 0;
        assert!(matches!(config.validate(), Err(FusionError::Config { .. })));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config =
            ResolverConfig::from_json_str(r#"{"stale_after_hours": 6, "fallback": {"wind_speed": 4.0}}"#)
                .unwrap();
        assert_eq!(config.stale_after_hours, 6);
        assert_eq!(config.fallback.wind_speed, 4.0);
        assert_eq!(config.fallback.wave_height, 1.0);
        assert_eq!(config.buoy_primary_radius_km, 50.0);

        assert!(ResolverConfig::from_json_str(r#"{"buoy_primary_radius_km": -1}"#).is_err());
    }

    #[test]
    fn test_level_at_interpolates_between_samples() {
        let t = now();
        let samples = vec![
            TideSample { time: t - Duration::hours(1), level: 1.0 },
            TideSample { time: t + Duration::hours(1), level: 2.0 },
            TideSample { time: t + Duration::hours(2), level: 0.5 },
        ];
        assert!((level_at(&samples, t).unwrap() - 1.5).abs() < 1e-12);
        assert_eq!(level_at(&samples, t + Duration::hours(2)), Some(0.5));
        assert_eq!(level_at(&samples, t - Duration::hours(2)), None);
        assert_eq!(level_at(&samples, t + Duration::hours(3)), None);
        assert_eq!(level_at(&[], t), None);
    }

    #[tokio::test]
    async fn test_stale_primary_reading() {
        let source = MemorySource::new().with_buoy(
            Station::new("46042", "Monterey", 36.80, -122.40),
            Some(reading("46042", 1.8, 5)),
        );
        let resolver = HierarchyResolver::prepare(&source, ResolverConfig::default(), now())
            .await
            .unwrap();

        let fused = resolver
            .resolve_metric(Metric::WaveHeight, 36.82, -122.38, now())
            .await;
        assert_eq!(fused.value, Some(1.8));
        assert_eq!(fused.quality, QualityFlag::Stale);
        assert_eq!(fused.source_hierarchy, vec!["buoy_46042_primary"]);
        assert_eq!(fused.resolved_by(), Some("buoy_46042_primary"));
    }

    #[tokio::test]
    async fn test_wave_model_tier_single_point() {
        let source = MemorySource::new().with_model_point(ModelGridPoint {
            lat: 36.5,
            lon: 237.5,
            wave_height: Some(2.4),
            wave_period: Some(13.0),
            wave_direction: None,
        });
        let resolver = HierarchyResolver::prepare(&source, ResolverConfig::default(), now())
            .await
            .unwrap();

        let fused = resolver
            .resolve_metric(Metric::WavePeriod, 36.6, -122.4, now())
            .await;
        assert_eq!(fused.value, Some(13.0));
        assert_eq!(fused.quality, QualityFlag::Modeled);
        assert_eq!(
            fused.source_hierarchy,
            vec!["buoy_primary", "buoy_interpolation", "wavewatch_model"]
        );
    }

    #[tokio::test]
    async fn test_wave_direction_falls_back_to_wind() {
        let source = MemorySource::new().with_weather(WeatherReading {
            source_id: "gfs".to_string(),
            time: now(),
            air_temp: None,
            wind_speed: None,
            wind_direction: Some(285.0),
            quality: QualityFlag::Modeled,
        });
        let resolver = HierarchyResolver::prepare(&source, ResolverConfig::default(), now())
            .await
            .unwrap();

        let fused = resolver
            .resolve_metric(Metric::WaveDirection, 36.6, -122.4, now())
            .await;
        assert_eq!(fused.value, Some(285.0));
        assert_eq!(fused.quality, QualityFlag::Interpolated);
        assert_eq!(fused.source_hierarchy.last().unwrap(), "wind_direction_fallback");

        let wind = resolver
            .resolve_metric(Metric::WindSpeed, 36.6, -122.4, now())
            .await;
        assert_eq!(wind.value, Some(5.0));
        assert_eq!(wind.quality, QualityFlag::Historical);
        assert_eq!(wind.source_hierarchy, vec!["weather_gfs_primary", "buoy_interpolation", "fallback"]);
        assert_eq!(wind.resolved_by(), None);
    }

    #[tokio::test]
    async fn test_tide_primary_and_missing() {
        let t = now();
        let source = MemorySource::new().with_tide_station(
            Station::new("9413450", "Monterey", 36.605, -121.888),
            vec![
                TideSample { time: t, level: 1.2 },
                TideSample { time: t + Duration::hours(1), level: 1.4 },
            ],
        );
        let resolver = HierarchyResolver::prepare(&source, ResolverConfig::default(), now())
            .await
            .unwrap();

        let tide = resolver
            .resolve_metric(Metric::TideLevel, 36.6, -121.9, t + Duration::minutes(30))
            .await;
        assert!((tide.value.unwrap() - 1.3).abs() < 1e-9);
        assert_eq!(tide.quality, QualityFlag::Primary);
        assert_eq!(tide.source_hierarchy, vec!["tide_9413450_primary"]);

        // Beyond the prediction series nothing else is in range
        let later = resolver
            .resolve_metric(Metric::TideLevel, 36.6, -121.9, t + Duration::hours(5))
            .await;
        assert_eq!(later.value, None);
        assert!(later.is_missing());
        assert_eq!(
            later.source_hierarchy,
            vec!["tide_9413450_primary", "tide_interpolation", "no_data"]
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let source = MemorySource::new();
        let mut config = ResolverConfig::default();
        config.max_secondary_sources = 0;
        assert!(HierarchyResolver::prepare(&source, config, now()).await.is_err());
    }
}
