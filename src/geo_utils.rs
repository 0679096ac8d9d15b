//! Geographic utilities: great-circle distance and angle helpers.

/// Mean Earth radius used by all distance calculations (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Great-circle distance between two coordinates in kilometres (Haversine).
///
/// # Example
/// ```
/// use swell_fusion::geo_utils::distance_km;
/// let london_paris = distance_km(51.5074, -0.1278, 48.8566, 2.3522);
/// assert!((london_paris - 343.5).abs() < 1.0);
/// ```
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Normalize an angle in degrees into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Smallest absolute difference between two bearings, in `[0, 180]`.
pub fn angular_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Map a longitude from the 0–360 model-grid convention into `[-180, 180]`.
pub fn normalize_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Approximate half-widths `(lat_deg, lon_deg)` of a box covering `radius_km`
/// around `lat`. Used to pre-filter spatial index queries before exact
/// great-circle distances are computed.
pub fn km_to_degrees(radius_km: f64, lat: f64) -> (f64, f64) {
    let lat_deg = radius_km / KM_PER_DEGREE;
    let cos_lat = lat.to_radians().cos().abs().max(0.01);
    let lon_deg = (radius_km / (KM_PER_DEGREE * cos_lat)).min(180.0);
    (lat_deg, lon_deg)
}
