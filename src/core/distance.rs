use crate::models::{BoundingBox, Location};

/// Earth's radius in miles
///
/// Every distance and distance threshold in this crate is in miles.
pub const EARTH_RADIUS_MILES: f64 = 3956.0;

/// Miles per degree of latitude (and of longitude at the equator)
const MILES_PER_DEGREE: f64 = 69.0;

/// Calculate the Haversine distance between two points in miles
///
/// The haversine term is clamped to `[0, 1]`, so rounding near identical or
/// antipodal points can never produce NaN.
///
/// # Arguments
/// * `lat1` - Latitude of first point in degrees
/// * `lon1` - Longitude of first point in degrees
/// * `lat2` - Latitude of second point in degrees
/// * `lon2` - Longitude of second point in degrees
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = lat2_rad - lat1_rad;
    let delta_lon = lon2.to_radians() - lon1.to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    central_angle(a) * EARTH_RADIUS_MILES
}

#[inline]
fn central_angle(a: f64) -> f64 {
    2.0 * a.clamp(0.0, 1.0).sqrt().asin()
}

/// Distance between two locations in miles
#[inline]
pub fn distance_between(a: &Location, b: &Location) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Target locations with their trigonometry precomputed, for one-to-many
/// distance rows.
#[derive(Debug, Clone)]
pub struct PreparedLocations {
    lat_rad: Vec<f64>,
    lon_rad: Vec<f64>,
    cos_lat: Vec<f64>,
}

impl PreparedLocations {
    pub fn new(locations: &[Location]) -> Self {
        let lat_rad: Vec<f64> = locations.iter().map(|l| l.lat.to_radians()).collect();
        let lon_rad = locations.iter().map(|l| l.lon.to_radians()).collect();
        let cos_lat = lat_rad.iter().map(|lat| lat.cos()).collect();

        Self { lat_rad, lon_rad, cos_lat }
    }

    pub fn len(&self) -> usize {
        self.lat_rad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lat_rad.is_empty()
    }

    /// Write the distance from `origin` to every prepared location into `out`
    pub fn distances_from(&self, origin: &Location, out: &mut Vec<f64>) {
        let lat1 = origin.lat.to_radians();
        let lon1 = origin.lon.to_radians();
        let cos_lat1 = lat1.cos();

        out.clear();
        out.extend(
            self.lat_rad
                .iter()
                .zip(&self.lon_rad)
                .zip(&self.cos_lat)
                .map(|((lat2, lon2), cos_lat2)| {
                    let a = ((lat2 - lat1) / 2.0).sin().powi(2)
                        + cos_lat1 * cos_lat2 * ((lon2 - lon1) / 2.0).sin().powi(2);
                    central_angle(a) * EARTH_RADIUS_MILES
                }),
        );
    }
}

/// Distances in miles from `origin` to each of `targets`
pub fn haversine_many(origin: &Location, targets: &[Location]) -> Vec<f64> {
    let mut out = Vec::with_capacity(targets.len());
    PreparedLocations::new(targets).distances_from(origin, &mut out);
    out
}

/// Calculate a bounding box around a center point
///
/// Much cheaper than Haversine, used to pre-filter candidates when a
/// distance cutoff is configured.
/// 1° latitude ≈ 69 miles, 1° longitude ≈ 69 miles * cos(latitude)
pub fn calculate_bounding_box(lat: f64, lon: f64, radius_miles: f64) -> BoundingBox {
    let lat_delta = radius_miles / MILES_PER_DEGREE;

    // Near the poles the longitude span degenerates; cover every longitude.
    let cos_lat = lat.to_radians().cos().abs();
    let lon_delta = if cos_lat < 1e-9 {
        180.0
    } else {
        (radius_miles / (MILES_PER_DEGREE * cos_lat)).min(180.0)
    };

    BoundingBox {
        min_lat: lat - lat_delta,
        max_lat: lat + lat_delta,
        min_lon: lon - lon_delta,
        max_lon: lon + lon_delta,
    }
}

/// Check if a point is within a bounding box
#[inline]
pub fn is_within_bounding_box(lat: f64, lon: f64, bbox: &BoundingBox) -> bool {
    lat >= bbox.min_lat
        && lat <= bbox.max_lat
        && lon >= bbox.min_lon
        && lon <= bbox.max_lon
}
