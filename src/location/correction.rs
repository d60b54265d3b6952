//! Regional city correction for the Rhine-Neckar metropolitan area.
//!
//! Reverse geocoders regularly attribute addresses in this area to the wrong
//! neighbouring city. A geocoded result inside a known centre's tolerance has
//! its city replaced by that centre's name.
//!
//! Distances here are planar in degree space. That skews with latitude
//! (a degree of longitude shrinks toward the poles), which is tolerable only
//! because every centre lies within roughly half a degree of latitude of the
//! others. Do not extend this table to a wide area without switching to
//! great-circle distance.

use super::types::{Accuracy, Coordinate, ResolvedLocation};

struct RegionCentre {
    city: &'static str,
    lat: f64,
    lon: f64,
    /// Snap radius in degrees. Tighter for centres with close neighbours.
    threshold: f64,
}

const REGION_CENTRES: &[RegionCentre] = &[
    RegionCentre { city: "Mannheim", lat: 49.4875, lon: 8.4660, threshold: 0.06 },
    RegionCentre { city: "Ludwigshafen am Rhein", lat: 49.4774, lon: 8.4452, threshold: 0.02 },
    RegionCentre { city: "Heidelberg", lat: 49.3988, lon: 8.6724, threshold: 0.07 },
    RegionCentre { city: "Viernheim", lat: 49.5386, lon: 8.5783, threshold: 0.025 },
    RegionCentre { city: "Weinheim", lat: 49.5450, lon: 8.6680, threshold: 0.04 },
    RegionCentre { city: "Schwetzingen", lat: 49.3833, lon: 8.5700, threshold: 0.03 },
    RegionCentre { city: "Speyer", lat: 49.3170, lon: 8.4412, threshold: 0.05 },
    RegionCentre { city: "Worms", lat: 49.6341, lon: 8.3507, threshold: 0.06 },
];

fn planar_distance(c: Coordinate, centre: &RegionCentre) -> f64 {
    let d_lat = c.latitude - centre.lat;
    let d_lon = c.longitude - centre.lon;
    (d_lat * d_lat + d_lon * d_lon).sqrt()
}

/// Nearest centre whose own threshold contains `c`.
pub fn nearest_centre(c: Coordinate) -> Option<&'static str> {
    REGION_CENTRES
        .iter()
        .map(|centre| (centre, planar_distance(c, centre)))
        .filter(|(centre, d)| *d < centre.threshold)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(centre, _)| centre.city)
}

/// Return a corrected copy of `loc`, or `loc` unchanged when no centre applies.
pub fn correct(loc: ResolvedLocation) -> ResolvedLocation {
    match nearest_centre(loc.coordinate) {
        Some(city) => {
            if loc.city.as_deref() != Some(city) {
                tracing::debug!(from = ?loc.city, to = city, "region correction applied");
            }
            loc.with_city(city, Accuracy::Corrected)
        }
        None => loc,
    }
}
