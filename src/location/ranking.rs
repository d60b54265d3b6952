//! Station proximity ranking and the built-in station table.
//!
//! Distances are great-circle (Haversine) on a 6371 km sphere. Travel time is
//! a flat 1.2 min/km placeholder, not a routing estimate.

use super::types::{Coordinate, RankOptions, RankedStation, Station};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const EARTH_RADIUS_KM: f64 = 6371.0;
const MINUTES_PER_KM: f64 = 1.2;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h just past 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Rank `stations` by distance from `origin`, keeping at most `opts.limit`
/// entries within `opts.max_distance_km`.
pub fn rank(origin: Coordinate, stations: &[Station], opts: RankOptions) -> Vec<RankedStation> {
    let mut ranked: Vec<RankedStation> = stations
        .iter()
        .map(|s| {
            let distance_km = haversine_km(origin, s.coordinate);
            RankedStation {
                station: s.clone(),
                distance_km,
                estimated_travel_minutes: distance_km * MINUTES_PER_KM,
            }
        })
        .filter(|r| r.distance_km <= opts.max_distance_km)
        .collect();

    ranked.sort_by(|a, b| a.distance_km.partial_cmp(&b.distance_km).unwrap_or(Ordering::Equal));
    ranked.truncate(opts.limit);
    ranked
}

// ─── Station table ──────────────────────────────────────────────

struct BuiltinStation {
    id: &'static str,
    name: &'static str,
    address: &'static str,
    lat: f64,
    lon: f64,
}

const BUILTIN_STATIONS: &[BuiltinStation] = &[
    BuiltinStation {
        id: "ma-hbf", name: "Mannheim Hauptbahnhof",
        address: "Willy-Brandt-Platz 17, 68161 Mannheim",
        lat: 49.4794, lon: 8.4699,
    },
    BuiltinStation {
        id: "ma-neckarau", name: "Mannheim Neckarau",
        address: "Friedrichstraße 2, 68199 Mannheim",
        lat: 49.4542, lon: 8.4886,
    },
    BuiltinStation {
        id: "lu-mitte", name: "Ludwigshafen Mitte",
        address: "Berliner Platz 1, 67059 Ludwigshafen am Rhein",
        lat: 49.4795, lon: 8.4421,
    },
    BuiltinStation {
        id: "hd-bahnstadt", name: "Heidelberg Bahnstadt",
        address: "Czernyring 22, 69115 Heidelberg",
        lat: 49.4036, lon: 8.6756,
    },
    BuiltinStation {
        id: "wnh-zentrum", name: "Weinheim Zentrum",
        address: "Bahnhofstraße 19, 69469 Weinheim",
        lat: 49.5497, lon: 8.6641,
    },
    BuiltinStation {
        id: "sp-dom", name: "Speyer Dom",
        address: "Maximilianstraße 1, 67346 Speyer",
        lat: 49.3171, lon: 8.4418,
    },
    BuiltinStation {
        id: "wo-nord", name: "Worms Nord",
        address: "Mainzer Straße 100, 67547 Worms",
        lat: 49.6421, lon: 8.3605,
    },
    BuiltinStation {
        id: "ber-mitte", name: "Berlin Mitte",
        address: "Unter den Linden 77, 10117 Berlin",
        lat: 52.5170, lon: 13.3889,
    },
    BuiltinStation {
        id: "ber-ostbahnhof", name: "Berlin Ostbahnhof",
        address: "Koppenstraße 3, 10243 Berlin",
        lat: 52.5103, lon: 13.4348,
    },
    BuiltinStation {
        id: "fra-hbf", name: "Frankfurt Hauptbahnhof",
        address: "Am Hauptbahnhof, 60329 Frankfurt am Main",
        lat: 50.1071, lon: 8.6638,
    },
];

/// The compiled-in station list.
pub fn builtin_stations() -> Vec<Station> {
    BUILTIN_STATIONS
        .iter()
        .map(|s| Station {
            id: s.id.to_string(),
            name: s.name.to_string(),
            address: s.address.to_string(),
            coordinate: Coordinate { latitude: s.lat, longitude: s.lon },
        })
        .collect()
}

/// Load stations from a JSON array file, falling back to the built-in list
/// when the file is missing or malformed.
pub fn load_stations(path: Option<&Path>) -> Vec<Station> {
    let Some(path) = path else {
        return builtin_stations();
    };
    let parsed = fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_str::<Vec<Station>>(&data).map_err(|e| e.to_string()));

    match parsed {
        Ok(stations) => {
            info!(count = stations.len(), path = %path.display(), "loaded station table");
            stations
        }
        Err(e) => {
            warn!(path = %path.display(), "cannot read station table: {}; using built-in list", e);
            builtin_stations()
        }
    }
}
