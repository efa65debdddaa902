//! Great-circle distance, used by the matrix builder for nearest-node
//! lookup (spec.md §4.2 step 1). Road-network travel time/distance itself
//! comes from the road graph, not from this estimate.

use crate::domain::Coord;

/// Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates, in kilometres.
pub fn distance_km(from: Coord, to: Coord) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_has_zero_distance() {
        let dist = distance_km(Coord::new(59.33, 18.06), Coord::new(59.33, 18.06));
        assert!(dist < 0.001, "same point should have ~0 distance");
    }

    #[test]
    fn known_distance_stockholm_to_gothenburg() {
        // Stockholm (59.33, 18.06) to Gothenburg (57.71, 11.97): ~390 km.
        let dist = distance_km(Coord::new(59.33, 18.06), Coord::new(57.71, 11.97));
        assert!(dist > 350.0 && dist < 430.0, "got {dist}");
    }
}
