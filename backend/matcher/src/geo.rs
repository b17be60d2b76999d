//! Great-circle distance between coordinates.

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance in kilometres between two `(lat, lng)` points given in degrees,
/// using the haversine formula.
///
/// Identical points yield exactly `0.0`; antipodal points yield half the
/// Earth's circumference without producing `NaN`.
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    // Rounding can push `a` a hair outside [0, 1] near the antipode.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}
