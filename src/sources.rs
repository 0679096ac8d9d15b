//! External collaborator interface.
//!
//! The fusion core never fetches anything itself. Station feeds, forecast
//! grids, tide tables and wave models are reached through
//! [`ObservationSource`]; any transport or parse failure is reported as an
//! `Err`, which the resolver treats exactly like "this source has no value".

use std::collections::{HashMap, HashSet};
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::geo_utils::normalize_longitude;
use crate::sanitize::{validate, ReadingField};
use crate::stations::Station;
use crate::{Metric, QualityFlag};

/// Latest observation from a buoy. Absent fields are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuoyReading {
    pub station_id: String,
    pub observed_at: DateTime<Utc>,
    /// Significant wave height (m)
    pub wave_height: Option<f64>,
    /// Dominant wave period (s)
    pub dominant_period: Option<f64>,
    /// Average wave period (s)
    pub average_period: Option<f64>,
    /// Mean wave direction (deg, coming from)
    pub wave_direction: Option<f64>,
    /// Wind speed (m/s)
    pub wind_speed: Option<f64>,
    /// Wind direction (deg, coming from)
    pub wind_direction: Option<f64>,
    /// Gust speed (m/s)
    pub wind_gust: Option<f64>,
    /// Water temperature (°C)
    pub water_temp: Option<f64>,
    /// Air temperature (°C)
    pub air_temp: Option<f64>,
    /// Sea-level pressure (hPa)
    pub pressure: Option<f64>,
}

impl BuoyReading {
    /// Empty reading for `station_id` observed at `observed_at`.
    pub fn new(station_id: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            station_id: station_id.to_string(),
            observed_at,
            ..Default::default()
        }
    }

    /// Drop every field outside its physical valid range.
    pub fn sanitized(self) -> Self {
        Self {
            wave_height: validate(self.wave_height, ReadingField::WaveHeight),
            dominant_period: validate(self.dominant_period, ReadingField::DominantPeriod),
            average_period: validate(self.average_period, ReadingField::AveragePeriod),
            wave_direction: validate(self.wave_direction, ReadingField::WaveDirection),
            wind_speed: validate(self.wind_speed, ReadingField::WindSpeed),
            wind_direction: validate(self.wind_direction, ReadingField::WindDirection),
            wind_gust: validate(self.wind_gust, ReadingField::WindGust),
            water_temp: validate(self.water_temp, ReadingField::WaterTemp),
            air_temp: validate(self.air_temp, ReadingField::AirTemp),
            pressure: validate(self.pressure, ReadingField::Pressure),
            ..self
        }
    }

    /// Value of `metric` carried by this reading, if any.
    ///
    /// Wave period prefers the dominant period over the average period.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        let value = match metric {
            Metric::WaveHeight => self.wave_height,
            Metric::WavePeriod => self.dominant_period.or(self.average_period),
            Metric::WaveDirection => self.wave_direction,
            Metric::AirTemperature => self.air_temp,
            Metric::WindSpeed => self.wind_speed,
            Metric::WindDirection => self.wind_direction,
            Metric::WaterTemperature => self.water_temp,
            Metric::TideLevel => None,
        };
        value.filter(|v| v.is_finite())
    }
}

/// Forecast-grid values at a point and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// Grid/provider identifier, e.g. `gfs`
    pub source_id: String,
    pub time: DateTime<Utc>,
    pub air_temp: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    /// Label assigned by the provider
    pub quality: QualityFlag,
}

impl WeatherReading {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        let value = match metric {
            Metric::AirTemperature => self.air_temp,
            Metric::WindSpeed => self.wind_speed,
            Metric::WindDirection => self.wind_direction,
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}

/// One tide prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TideSample {
    pub time: DateTime<Utc>,
    /// Water level (m)
    pub level: f64,
}

/// One wave-model grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGridPoint {
    pub lat: f64,
    /// Either convention; see [`ModelGridPoint::normalized_lon`]
    pub lon: f64,
    pub wave_height: Option<f64>,
    pub wave_period: Option<f64>,
    pub wave_direction: Option<f64>,
}

impl ModelGridPoint {
    /// Longitude in `[-180, 180]`.
    pub fn normalized_lon(&self) -> f64 {
        normalize_longitude(self.lon)
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        let value = match metric {
            Metric::WaveHeight => self.wave_height,
            Metric::WavePeriod => self.wave_period,
            Metric::WaveDirection => self.wave_direction,
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}

/// Everything the fusion core needs from the outside world.
pub trait ObservationSource: Send + Sync {
    /// Buoy registry.
    fn buoy_stations(&self) -> impl Future<Output = Result<Vec<Station>>> + Send;

    /// Latest reading of one buoy, `None` if it has not reported.
    fn latest_buoy_reading(
        &self,
        station_id: &str,
    ) -> impl Future<Output = Result<Option<BuoyReading>>> + Send;

    /// Forecast-grid values for a point and time.
    fn weather_at(
        &self,
        lat: f64,
        lon: f64,
        time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<WeatherReading>>> + Send;

    /// Tide gauge registry.
    fn tide_stations(&self) -> impl Future<Output = Result<Vec<Station>>> + Send;

    /// Tide predictions for one station covering `time`, in ascending order.
    fn tide_predictions(
        &self,
        station_id: &str,
        time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<TideSample>>> + Send;

    /// Wave-model grid cells around a point. Defaults to no model.
    fn wave_model_points(
        &self,
        _lat: f64,
        _lon: f64,
        _time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ModelGridPoint>>> + Send {
        async { Ok(Vec::new()) }
    }

    /// Distance from a point to the nearest coastline. Defaults to unknown.
    fn distance_to_shore_km(
        &self,
        _lat: f64,
        _lon: f64,
    ) -> impl Future<Output = Result<Option<f64>>> + Send {
        async { Ok(None) }
    }
}

/// In-memory source, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    buoys: Vec<Station>,
    readings: HashMap<String, BuoyReading>,
    failing_buoys: HashSet<String>,
    weather: Vec<WeatherReading>,
    weather_fails: bool,
    tide_stations: Vec<Station>,
    tides: HashMap<String, Vec<TideSample>>,
    model_points: Vec<ModelGridPoint>,
    distance_to_shore: Option<f64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buoy and, optionally, its latest reading.
    pub fn with_buoy(mut self, station: Station, reading: Option<BuoyReading>) -> Self {
        if let Some(reading) = reading {
            self.readings.insert(station.id.clone(), reading);
        }
        self.buoys.push(station);
        self
    }

    /// Register a buoy whose reading fetch always errors.
    pub fn with_failing_buoy(mut self, station: Station) -> Self {
        self.failing_buoys.insert(station.id.clone());
        self.buoys.push(station);
        self
    }

    /// Add a grid reading; lookups return the reading nearest in time.
    pub fn with_weather(mut self, reading: WeatherReading) -> Self {
        self.weather.push(reading);
        self
    }

    /// Make every weather lookup error.
    pub fn with_weather_failure(mut self) -> Self {
        self.weather_fails = true;
        self
    }

    pub fn with_tide_station(mut self, station: Station, mut samples: Vec<TideSample>) -> Self {
        samples.sort_by_key(|s| s.time);
        self.tides.insert(station.id.clone(), samples);
        self.tide_stations.push(station);
        self
    }

    pub fn with_model_point(mut self, point: ModelGridPoint) -> Self {
        self.model_points.push(point);
        self
    }

    pub fn with_distance_to_shore(mut self, km: f64) -> Self {
        self.distance_to_shore = Some(km);
        self
    }
}

impl ObservationSource for MemorySource {
    async fn buoy_stations(&self) -> Result<Vec<Station>> {
        Ok(self.buoys.clone())
    }

    async fn latest_buoy_reading(&self, station_id: &str) -> Result<Option<BuoyReading>> {
        if self.failing_buoys.contains(station_id) {
            return Err(FusionError::source_failure(
                "memory",
                format!("buoy {} unreachable", station_id),
            ));
        }
        Ok(self.readings.get(station_id).cloned())
    }

    async fn weather_at(
        &self,
        _lat: f64,
        _lon: f64,
        time: DateTime<Utc>,
    ) -> Result<Option<WeatherReading>> {
        if self.weather_fails {
            return Err(FusionError::source_failure("memory", "weather grid unavailable"));
        }
        Ok(self
            .weather
            .iter()
            .min_by_key(|w| (w.time - time).num_seconds().abs())
            .cloned())
    }

    async fn tide_stations(&self) -> Result<Vec<Station>> {
        Ok(self.tide_stations.clone())
    }

    async fn tide_predictions(&self, station_id: &str, _time: DateTime<Utc>) -> Result<Vec<TideSample>> {
        Ok(self.tides.get(station_id).cloned().unwrap_or_default())
    }

    async fn wave_model_points(
        &self,
        _lat: f64,
        _lon: f64,
        _time: DateTime<Utc>,
    ) -> Result<Vec<ModelGridPoint>> {
        Ok(self.model_points.clone())
    }

    async fn distance_to_shore_km(&self, _lat: f64, _lon: f64) -> Result<Option<f64>> {
        Ok(self.distance_to_shore)
    }
}
