//! Station descriptors and an R-tree index for radius and nearest queries.
//!
//! The R-tree works in raw degrees, so it only pre-filters candidates inside
//! a bounding box; exact great-circle distances decide membership and order.

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{distance_km, km_to_degrees};
use crate::GeoPoint;

/// A fixed observing station (buoy or tide gauge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl Station {
    pub fn new(id: &str, name: &str, lat: f64, lon: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            lat,
            lon,
        }
    }

    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// A station together with its distance from a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyStation<'a> {
    pub station: &'a Station,
    pub distance_km: f64,
}

/// Station position with its index, for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedStation {
    idx: usize,
    lat: f64,
    lon: f64,
}

impl RTreeObject for IndexedStation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

/// Spatial index over a station registry.
#[derive(Debug)]
pub struct StationIndex {
    stations: Vec<Station>,
    tree: RTree<IndexedStation>,
}

impl StationIndex {
    /// Build an index, skipping stations with invalid coordinates.
    pub fn new(stations: Vec<Station>) -> Self {
        let stations: Vec<Station> = stations
            .into_iter()
            .filter(|s| s.location().is_valid())
            .collect();
        let indexed: Vec<IndexedStation> = stations
            .iter()
            .enumerate()
            .map(|(idx, s)| IndexedStation {
                idx,
                lat: s.lat,
                lon: s.lon,
            })
            .collect();
        Self {
            stations,
            tree: RTree::bulk_load(indexed),
        }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations within `radius_km`, nearest first (ties broken by id).
    pub fn within(&self, lat: f64, lon: f64, radius_km: f64) -> Vec<NearbyStation<'_>> {
        let (lat_deg, lon_deg) = km_to_degrees(radius_km, lat);
        let min_lat = (lat - lat_deg).max(-90.0);
        let max_lat = (lat + lat_deg).min(90.0);

        // Split the box at the antimeridian
        let mut boxes = vec![(lon - lon_deg, lon + lon_deg)];
        if lon - lon_deg < -180.0 {
            boxes.push((lon - lon_deg + 360.0, 180.0));
        }
        if lon + lon_deg > 180.0 {
            boxes.push((-180.0, lon + lon_deg - 360.0));
        }

        let mut seen = vec![false; self.stations.len()];
        let mut nearby = Vec::new();
        for (min_lon, max_lon) in boxes {
            let envelope = AABB::from_corners([min_lon, min_lat], [max_lon, max_lat]);
            for candidate in self.tree.locate_in_envelope(&envelope) {
                if seen[candidate.idx] {
                    continue;
                }
                seen[candidate.idx] = true;
                let distance = distance_km(lat, lon, candidate.lat, candidate.lon);
                if distance <= radius_km {
                    nearby.push(NearbyStation {
                        station: &self.stations[candidate.idx],
                        distance_km: distance,
                    });
                }
            }
        }

        nearby.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.station.id.cmp(&b.station.id))
        });
        nearby
    }

    /// Nearest station within `radius_km`.
    pub fn nearest_within(&self, lat: f64, lon: f64, radius_km: f64) -> Option<NearbyStation<'_>> {
        self.within(lat, lon, radius_km).into_iter().next()
    }
}
