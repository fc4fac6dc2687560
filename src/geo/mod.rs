use crate::models::location::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_M * central_angle
}

/// Passes the first point and then only points at least `min_distance_m`
/// away from the last one that passed.
#[derive(Debug, Clone)]
pub struct DistanceFilter {
    min_distance_m: f64,
    last_accepted: Option<GeoPoint>,
}

impl DistanceFilter {
    pub fn new(min_distance_m: f64) -> Self {
        Self {
            min_distance_m: min_distance_m.max(0.0),
            last_accepted: None,
        }
    }

    pub fn accept(&mut self, point: GeoPoint) -> bool {
        let accepted = match &self.last_accepted {
            None => true,
            Some(last) => haversine_m(last, &point) >= self.min_distance_m,
        };

        if accepted {
            self.last_accepted = Some(point);
        }
        accepted
    }
}
