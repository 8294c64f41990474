//! Proximity queries over anything with a coordinate.
//!
//! Distances are great-circle (haversine) distances in meters. `nearby` is a
//! pure function of the query point, the radius and the candidate set, so the
//! same ranking applies to stops, bus positions and alerts.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Mean Earth radius used by `geo`'s haversine implementation.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

pub const DEFAULT_ALERT_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_BUS_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_STOP_RADIUS_KM: f64 = 1.0;

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoreError::validation(format!(
                "latitude out of range: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoreError::validation(format!(
                "longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(())
    }

    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        Point::from(*self).haversine_distance(&Point::from(*other))
    }
}

impl From<GeoPoint> for Point {
    fn from(p: GeoPoint) -> Self {
        // geo points are (x = longitude, y = latitude)
        Point::new(p.longitude, p.latitude)
    }
}

/// An entity that can take part in a proximity query.
pub trait Located {
    type Id: Ord;

    fn id(&self) -> Self::Id;
    fn position(&self) -> GeoPoint;
}

/// One ranked result of a proximity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranked<T> {
    pub entity: T,
    pub distance_meters: f64,
}

/// Checks a query point and radius the way every proximity operation must.
pub fn validate_query(point: Option<GeoPoint>, radius_km: f64) -> CoreResult<GeoPoint> {
    let point = point.ok_or_else(|| CoreError::validation("latitude and longitude are required"))?;
    point.validate()?;
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(CoreError::validation(format!(
            "radius must be a positive number of kilometers, got {}",
            radius_km
        )));
    }
    Ok(point)
}

pub fn km_to_meters(radius_km: f64) -> f64 {
    radius_km * 1000.0
}

/// Returns the candidates within `radius_km` of `point`, nearest first.
///
/// Equal distances are ordered by entity id.
pub fn nearby<T, I>(candidates: I, point: GeoPoint, radius_km: f64) -> Vec<Ranked<T>>
where
    T: Located,
    I: IntoIterator<Item = T>,
{
    let limit = km_to_meters(radius_km);

    let mut ranked: Vec<Ranked<T>> = candidates
        .into_iter()
        .filter_map(|entity| {
            let distance_meters = point.distance_meters(&entity.position());
            (distance_meters <= limit).then_some(Ranked {
                entity,
                distance_meters,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_meters
            .total_cmp(&b.distance_meters)
            .then_with(|| a.entity.id().cmp(&b.entity.id()))
    });
    ranked
}

/// Coarse lat/lon window containing every point within a radius.
///
/// Stores use it to narrow candidates before the exact haversine filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// `None` when the circle reaches a pole or wraps the antimeridian; callers
    /// then skip the prefilter.
    pub fn around(point: GeoPoint, radius_m: f64) -> Option<Self> {
        // angular radius, padded so float noise never excludes a boundary point
        let angular = radius_m / EARTH_RADIUS_METERS * (1.0 + 1e-9) + 1e-12;
        let lat = point.latitude.to_radians();

        let min_lat = lat - angular;
        let max_lat = lat + angular;
        if min_lat <= -std::f64::consts::FRAC_PI_2 || max_lat >= std::f64::consts::FRAC_PI_2 {
            return None;
        }

        let ratio = angular.sin() / lat.cos();
        if ratio >= 1.0 {
            return None;
        }
        let delta_lon = ratio.asin();
        let lon = point.longitude.to_radians();
        let min_lon = lon - delta_lon;
        let max_lon = lon + delta_lon;
        if min_lon < -std::f64::consts::PI || max_lon > std::f64::consts::PI {
            return None;
        }

        Some(Self {
            min_lat: min_lat.to_degrees(),
            max_lat: max_lat.to_degrees(),
            min_lon: min_lon.to_degrees(),
            max_lon: max_lon.to_degrees(),
        })
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }
}
