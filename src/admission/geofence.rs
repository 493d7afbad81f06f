//! Great-circle proximity checks.

use crate::models::{Coordinates, Geofence};

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Outcome of checking a submitter against a geofence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeofenceVerdict {
    /// Submitter is within the radius.
    Inside {
        /// Measured distance in meters.
        distance_m: f64,
    },
    /// Submitter sent no coordinates.
    Missing,
    /// Submitted coordinates are non-finite or out of range.
    Unusable,
    /// Submitter is beyond the radius.
    Outside {
        /// Measured distance in meters.
        distance_m: f64,
    },
}

/// Haversine distance between two points, in meters.
pub fn haversine_distance(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Check optional submitter coordinates against a geofence.
pub fn check(fence: &Geofence, submitted: Option<Coordinates>) -> GeofenceVerdict {
    let Some(at) = submitted else {
        return GeofenceVerdict::Missing;
    };

    if !at.is_valid() {
        return GeofenceVerdict::Unusable;
    }

    let distance_m = haversine_distance(fence.center, at);
    if distance_m <= fence.radius_m {
        GeofenceVerdict::Inside { distance_m }
    } else {
        GeofenceVerdict::Outside { distance_m }
    }
}
