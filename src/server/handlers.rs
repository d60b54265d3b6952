use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::location::{
    Accuracy, ConsentFlag, Coordinate, LocationSource, RankOptions, RankedStation, Resolution,
    ResolvedLocation, Station,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

fn checked_coordinate(lat: f64, lon: f64) -> Result<Coordinate, ApiError> {
    Coordinate::new(lat, lon).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "Invalid coordinates. Lat: -90..90, Lon: -180..180",
        )
    })
}

// ─── GET /api/location ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    pub force: bool,
    pub max_distance_km: Option<f64>,
    pub limit: Option<usize>,
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResolveQuery>,
) -> Json<Resolution> {
    let start = Instant::now();
    let defaults = state.resolver.rank_options();
    let opts = RankOptions {
        max_distance_km: params.max_distance_km.unwrap_or(defaults.max_distance_km),
        limit: params.limit.unwrap_or(defaults.limit),
    };

    let resolution = state.resolver.resolve_with(params.force, opts).await;

    info!(
        force = params.force,
        source = %resolution.location.source,
        stations = resolution.nearby_stations.len(),
        "GET /api/location -> {} ({:.1}ms)",
        resolution.location.label(),
        start.elapsed().as_secs_f64() * 1000.0,
    );
    Json(resolution)
}

// ─── PUT /api/location, POST /api/location/select ────────────────

/// A caller-supplied location. Omitted metadata takes neutral defaults.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInput {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub source: Option<LocationSource>,
    #[serde(default)]
    pub accuracy: Option<Accuracy>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LocationInput {
    fn into_resolved(self) -> Result<ResolvedLocation, ApiError> {
        let coordinate = checked_coordinate(self.latitude, self.longitude)?;
        if self.source == Some(LocationSource::Default) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "The default location cannot be stored",
            ));
        }
        Ok(ResolvedLocation {
            coordinate,
            formatted_address: self.address.unwrap_or_else(|| coordinate.to_string()),
            city: self.city,
            region: self.region,
            country: self.country,
            postal_code: self.postal_code,
            source: self.source.unwrap_or(LocationSource::Sensor),
            accuracy: self.accuracy.unwrap_or_default(),
            resolved_at: self.resolved_at.unwrap_or_else(Utc::now),
        })
    }
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Json(input): Json<LocationInput>,
) -> Result<Json<Resolution>, ApiError> {
    let loc = input.into_resolved()?;
    info!("PUT /api/location -> {}", loc.label());
    Ok(Json(state.resolver.update(loc)))
}

pub async fn select(
    State(state): State<Arc<AppState>>,
    Json(input): Json<LocationInput>,
) -> Result<Json<Resolution>, ApiError> {
    let loc = input.into_resolved()?;
    info!("POST /api/location/select -> {}", loc.label());
    Ok(Json(state.resolver.select(loc)))
}

// ─── POST /api/location/home ─────────────────────────────────────

pub async fn promote_home(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResolvedLocation>, ApiError> {
    state
        .resolver
        .promote_to_home()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "No location to promote yet"))
}

// ─── GET /api/location/history ───────────────────────────────────

pub async fn history(State(state): State<Arc<AppState>>) -> Json<Vec<ResolvedLocation>> {
    Json(state.resolver.history())
}

// ─── GET /api/stations, /api/stations/nearby ─────────────────────

pub async fn stations(State(state): State<Arc<AppState>>) -> Json<Vec<Station>> {
    Json(state.resolver.stations().to_vec())
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub max_distance_km: Option<f64>,
    pub limit: Option<usize>,
}

pub async fn nearby(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyQuery>,
) -> Result<Json<Vec<RankedStation>>, ApiError> {
    let (Some(lat), Some(lon)) = (params.lat, params.lon) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Provide 'lat' and 'lon' parameters"));
    };
    let origin = checked_coordinate(lat, lon)?;
    let defaults = state.resolver.rank_options();
    let opts = RankOptions {
        max_distance_km: params.max_distance_km.unwrap_or(defaults.max_distance_km),
        limit: params.limit.unwrap_or(defaults.limit),
    };
    Ok(Json(state.resolver.rank(origin, opts)))
}

// ─── GET/PUT /api/consent ────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ConsentBody {
    pub functional: bool,
}

pub async fn consent(State(state): State<Arc<AppState>>) -> Json<ConsentBody> {
    Json(ConsentBody {
        functional: state.consent.functional_storage_permitted(),
    })
}

pub async fn set_consent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConsentBody>,
) -> Json<ConsentBody> {
    state.consent.set(body.functional);
    info!(functional = body.functional, "consent updated");
    Json(body)
}
