//! # TTL Cache
//!
//! Memoisation with expiry for collaborator lookups, plus
//! [`CachedSource`], a wrapper that puts any [`ObservationSource`] behind
//! it. Failures are cached too (shorter TTL) so a dead station is not
//! hammered once per metric per forecast hour.
//!
//! The clock is always passed in explicitly, keeping expiry testable
//! without sleeping.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sources::{BuoyReading, ModelGridPoint, ObservationSource, TideSample, WeatherReading};
use crate::stations::Station;

/// A TTL cache with least-recently-used eviction at capacity.
///
/// Eviction is a linear scan, which is fine for the few hundred entries a
/// forecast run touches.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    capacity: usize,
    entries: HashMap<K, CacheEntry<V>>,
    access_counter: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_access: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a new cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    /// Get a live value, updating its access time. Expired entries are removed.
    pub fn get<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let expired = match self.entries.get(key) {
            Some(entry) => now >= entry.expires_at,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = counter;
            &entry.value
        })
    }

    /// Get a cloned live value.
    pub fn get_cloned<Q>(&mut self, key: &Q, now: Instant) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key, now).cloned()
    }

    /// Insert a value living for `ttl`, evicting if at capacity.
    pub fn insert(&mut self, key: K, value: V, ttl: Duration, now: Instant) {
        self.access_counter += 1;
        let entry = CacheEntry {
            value,
            expires_at: now + ttl,
            last_access: self.access_counter,
        };

        if self.entries.contains_key(&key) {
            self.entries.insert(key, entry);
            return;
        }

        if self.entries.len() >= self.capacity {
            self.purge_expired(now);
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key, entry);
    }

    /// Remove a specific key.
    pub fn invalidate<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key);
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| now < entry.expires_at);
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
        }
    }
}

/// Lifetimes and capacity for [`CachedSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries per cache. Default: 512
    pub capacity: usize,
    /// Successful lookups. Default: 900 s
    pub success_ttl_secs: u64,
    /// Failed lookups. Default: 120 s
    pub failure_ttl_secs: u64,
    /// Station registries. Default: 86400 s
    pub registry_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            success_ttl_secs: 900,
            failure_ttl_secs: 120,
            registry_ttl_secs: 86_400,
        }
    }
}

type Memo<V> = Mutex<TtlCache<String, Result<V>>>;

fn memo<V: Clone>(capacity: usize) -> Memo<V> {
    Mutex::new(TtlCache::new(capacity))
}

/// An [`ObservationSource`] whose lookups are memoised.
pub struct CachedSource<S> {
    inner: S,
    config: CacheConfig,
    registries: Memo<Vec<Station>>,
    readings: Memo<Option<BuoyReading>>,
    weather: Memo<Option<WeatherReading>>,
    tides: Memo<Vec<TideSample>>,
    models: Memo<Vec<ModelGridPoint>>,
    shore: Memo<Option<f64>>,
}

impl<S: ObservationSource> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, CacheConfig::default())
    }

    pub fn with_config(inner: S, config: CacheConfig) -> Self {
        Self {
            registries: memo(config.capacity),
            readings: memo(config.capacity),
            weather: memo(config.capacity),
            tides: memo(config.capacity),
            models: memo(config.capacity),
            shore: memo(config.capacity),
            inner,
            config,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        fn clear_one<V: Clone>(memo: &Memo<V>) {
            if let Ok(mut cache) = memo.lock() {
                cache.clear();
            }
        }
        clear_one(&self.registries);
        clear_one(&self.readings);
        clear_one(&self.weather);
        clear_one(&self.tides);
        clear_one(&self.models);
        clear_one(&self.shore);
    }

    async fn memoize<V, Fut>(
        &self,
        memo: &Memo<V>,
        key: String,
        success_ttl: Duration,
        fetch: Fut,
    ) -> Result<V>
    where
        V: Clone,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = lookup(memo, &key) {
            debug!("[CachedSource] hit {}", key);
            return hit;
        }

        let result = fetch.await;
        let ttl = if result.is_ok() {
            success_ttl
        } else {
            Duration::from_secs(self.config.failure_ttl_secs)
        };
        store(memo, key, result.clone(), ttl);
        result
    }

    fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.config.success_ttl_secs)
    }
}

fn lookup<V: Clone>(memo: &Memo<V>, key: &str) -> Option<Result<V>> {
    memo.lock()
        .ok()
        .and_then(|mut cache| cache.get_cloned(key, Instant::now()))
}

fn store<V: Clone>(memo: &Memo<V>, key: String, value: Result<V>, ttl: Duration) {
    if let Ok(mut cache) = memo.lock() {
        cache.insert(key, value, ttl, Instant::now());
    }
}

fn point_key(prefix: &str, lat: f64, lon: f64, time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => format!("{}:{:.4},{:.4}@{}", prefix, lat, lon, t.timestamp()),
        None => format!("{}:{:.4},{:.4}", prefix, lat, lon),
    }
}

impl<S: ObservationSource> ObservationSource for CachedSource<S> {
    async fn buoy_stations(&self) -> Result<Vec<Station>> {
        let ttl = Duration::from_secs(self.config.registry_ttl_secs);
        self.memoize(&self.registries, "buoys".to_string(), ttl, self.inner.buoy_stations())
            .await
    }

    async fn latest_buoy_reading(&self, station_id: &str) -> Result<Option<BuoyReading>> {
        self.memoize(
            &self.readings,
            station_id.to_string(),
            self.success_ttl(),
            self.inner.latest_buoy_reading(station_id),
        )
        .await
    }

    async fn weather_at(
        &self,
        lat: f64,
        lon: f64,
        time: DateTime<Utc>,
    ) -> Result<Option<WeatherReading>> {
        self.memoize(
            &self.weather,
            point_key("weather", lat, lon, Some(time)),
            self.success_ttl(),
            self.inner.weather_at(lat, lon, time),
        )
        .await
    }

    async fn tide_stations(&self) -> Result<Vec<Station>> {
        let ttl = Duration::from_secs(self.config.registry_ttl_secs);
        self.memoize(&self.registries, "tides".to_string(), ttl, self.inner.tide_stations())
            .await
    }

    async fn tide_predictions(&self, station_id: &str, time: DateTime<Utc>) -> Result<Vec<TideSample>> {
        // Sources may return only a window around `time`
        self.memoize(
            &self.tides,
            format!("{}@{}", station_id, time.timestamp()),
            self.success_ttl(),
            self.inner.tide_predictions(station_id, time),
        )
        .await
    }

    async fn wave_model_points(
        &self,
        lat: f64,
        lon: f64,
        time: DateTime<Utc>,
    ) -> Result<Vec<ModelGridPoint>> {
        self.memoize(
            &self.models,
            point_key("model", lat, lon, Some(time)),
            self.success_ttl(),
            self.inner.wave_model_points(lat, lon, time),
        )
        .await
    }

    async fn distance_to_shore_km(&self, lat: f64, lon: f64) -> Result<Option<f64>> {
        let ttl = Duration::from_secs(self.config.registry_ttl_secs);
        self.memoize(
            &self.shore,
            point_key("shore", lat, lon, None),
            ttl,
            self.inner.distance_to_shore_km(lat, lon),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FusionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_basic_operations() {
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        let mut cache: TtlCache<String, i32> = TtlCache::new(3);

        cache.insert("a".to_string(), 1, ttl, now);
        cache.insert("b".to_string(), 2, ttl, now);

        assert_eq!(cache.get("a", now), Some(&1));
        assert_eq!(cache.get("b", now), Some(&2));
        assert_eq!(cache.get("c", now), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expiry() {
        let now = Instant::now();
        let mut cache: TtlCache<String, i32> = TtlCache::new(3);
        cache.insert("a".to_string(), 1, Duration::from_secs(10), now);

        assert_eq!(cache.get("a", now + Duration::from_secs(9)), Some(&1));
        assert_eq!(cache.get("a", now + Duration::from_secs(10)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_prefers_expired_then_oldest() {
        let now = Instant::now();
        let long = Duration::from_secs(600);
        let mut cache: TtlCache<String, i32> = TtlCache::new(3);

        cache.insert("a".to_string(), 1, long, now);
        cache.insert("b".to_string(), 2, Duration::from_secs(1), now);
        cache.insert("c".to_string(), 3, long, now);

        // "b" has expired, so it goes first even though "a" is older
        let later = now + Duration::from_secs(5);
        cache.insert("d".to_string(), 4, long, later);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a", later), Some(&1));

        // Now "c" is least recently used
        cache.insert("e".to_string(), 5, long, later);
        assert_eq!(cache.get("c", later), None);
        assert_eq!(cache.get("d", later), Some(&4));
    }

    #[test]
    fn test_update_and_invalidate() {
        let now = Instant::now();
        let ttl = Duration::from_secs(60);
        let mut cache: TtlCache<String, i32> = TtlCache::new(3);

        cache.insert("a".to_string(), 1, ttl, now);
        cache.insert("a".to_string(), 10, ttl, now);
        assert_eq!(cache.get("a", now), Some(&10));
        assert_eq!(cache.len(), 1);

        cache.invalidate("a");
        assert!(cache.is_empty());
    }

    /// Counts fetches; the first `fail_first` calls error.
    struct CountingSource {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl ObservationSource for CountingSource {
        async fn buoy_stations(&self) -> Result<Vec<Station>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(FusionError::source_failure("counting", "down"));
            }
            Ok(vec![Station::new("46042", "Monterey", 36.785, -122.398)])
        }

        async fn latest_buoy_reading(&self, _station_id: &str) -> Result<Option<BuoyReading>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn weather_at(
            &self,
            _lat: f64,
            _lon: f64,
            _time: DateTime<Utc>,
        ) -> Result<Option<WeatherReading>> {
            Ok(None)
        }

        async fn tide_stations(&self) -> Result<Vec<Station>> {
            Ok(Vec::new())
        }

        async fn tide_predictions(&self, _station_id: &str, _time: DateTime<Utc>) -> Result<Vec<TideSample>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_cached_source_memoizes_successes() {
        let source = CachedSource::new(CountingSource {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });

        for _ in 0..3 {
            assert_eq!(source.latest_buoy_reading("46042").await.unwrap(), None);
        }
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);

        source.latest_buoy_reading("46026").await.unwrap();
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 2);

        source.clear();
        source.latest_buoy_reading("46042").await.unwrap();
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cached_source_memoizes_failures() {
        let source = CachedSource::new(CountingSource {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });

        assert!(source.buoy_stations().await.is_err());
        // The failure is served from cache instead of retrying
        assert!(source.buoy_stations().await.is_err());
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registries_are_keyed_separately() {
        let source = CachedSource::new(CountingSource {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        assert_eq!(source.buoy_stations().await.unwrap().len(), 1);
        assert!(source.tide_stations().await.unwrap().is_empty());
    }
}
