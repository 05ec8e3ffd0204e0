use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Miles everywhere at the API surface; conversion from the metric
/// great-circle math happens here and nowhere else.
pub const MILES_PER_KM: f64 = 0.621371;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn distance_miles(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * MILES_PER_KM
}

pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * 1_000.0
}

/// Service-area check for courier eligibility (radius in miles).
pub fn within_radius_miles(center: &GeoPoint, point: &GeoPoint, radius_miles: f64) -> bool {
    distance_miles(center, point) <= radius_miles
}

#[cfg(test)]
mod tests {
    use super::{distance_miles, haversine_km, within_radius_miles};
    use crate::models::courier::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 37.7897,
            lng: -122.3972,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn soma_to_mission_bay_in_miles() {
        let pickup = GeoPoint {
            lat: 37.7897,
            lng: -122.3972,
        };
        let dropoff = GeoPoint {
            lat: 37.7663,
            lng: -122.4005,
        };
        let miles = distance_miles(&pickup, &dropoff);
        assert!(miles > 1.0 && miles < 2.0, "got {miles}");
    }

    #[test]
    fn radius_check_is_inclusive_at_the_boundary() {
        let center = GeoPoint { lat: 0.0, lng: 0.0 };
        let point = GeoPoint { lat: 0.0, lng: 0.0 };
        assert!(within_radius_miles(&center, &point, 0.0));
        assert!(!within_radius_miles(
            &center,
            &GeoPoint { lat: 1.0, lng: 0.0 },
            10.0
        ));
    }
}
