//! Position acquisition: one coordinate sample from the host's location source.
//!
//! The sensor is a capability. Hosts without one get [`NullSensor`], which
//! always reports `Unavailable`.

use super::types::{Coordinate, LocationError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Sampling parameters for one acquisition.
#[derive(Debug, Clone, Copy)]
pub struct SensorOptions {
    /// A previous sample at most this old may be returned as-is.
    pub max_age: Duration,
    /// Ask for the best fix the source can give. Advisory: sources with a
    /// single precision, such as IP lookup, ignore it.
    pub high_accuracy: bool,
    pub timeout: Duration,
}

impl Default for SensorOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
            high_accuracy: true,
            timeout: Duration::from_secs(15),
        }
    }
}

/// A source of device coordinates.
///
/// `opts` is handed through unchanged from the resolver. `max_age` and
/// `timeout` are binding; `high_accuracy` is a hint.
#[async_trait]
pub trait PositionAcquirer: Send + Sync {
    /// Take exactly one sample. Implementations must not retry internally.
    async fn acquire(&self, opts: &SensorOptions) -> Result<Coordinate, LocationError>;
}

/// Run one acquisition bounded by `opts.timeout`.
pub async fn acquire_with_timeout(
    sensor: &dyn PositionAcquirer,
    opts: &SensorOptions,
) -> Result<Coordinate, LocationError> {
    match tokio::time::timeout(opts.timeout, sensor.acquire(opts)).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout),
    }
}

/// No location capability on this host.
#[derive(Debug, Default)]
pub struct NullSensor;

#[async_trait]
impl PositionAcquirer for NullSensor {
    async fn acquire(&self, _opts: &SensorOptions) -> Result<Coordinate, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// A host-supplied fix, e.g. coordinates passed on the command line.
#[derive(Debug)]
pub struct FixedSensor(pub Coordinate);

#[async_trait]
impl PositionAcquirer for FixedSensor {
    async fn acquire(&self, _opts: &SensorOptions) -> Result<Coordinate, LocationError> {
        Ok(self.0)
    }
}

// ─── IP-based position ──────────────────────────────────────────

#[derive(Deserialize)]
struct IpApiResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Approximate position from the public IP address, for headless hosts.
///
/// Remembers its last sample so repeated calls within `max_age` skip the
/// network.
pub struct IpSensor {
    url: String,
    user_agent: String,
    last: Mutex<Option<(Instant, Coordinate)>>,
}

impl IpSensor {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: user_agent.into(),
            last: Mutex::new(None),
        }
    }

    fn recent(&self, max_age: Duration) -> Option<Coordinate> {
        let last = self.last.lock().ok()?;
        match *last {
            Some((at, c)) if at.elapsed() <= max_age => Some(c),
            _ => None,
        }
    }

    fn remember(&self, c: Coordinate) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some((Instant::now(), c));
        }
    }
}

fn parse_ip_response(r: IpApiResult) -> Result<Coordinate, LocationError> {
    let lat = r.latitude.ok_or(LocationError::Unavailable)?;
    let lon = r.longitude.ok_or(LocationError::Unavailable)?;
    Coordinate::new(lat, lon).ok_or(LocationError::Unavailable)
}

#[async_trait]
impl PositionAcquirer for IpSensor {
    async fn acquire(&self, opts: &SensorOptions) -> Result<Coordinate, LocationError> {
        if let Some(c) = self.recent(opts.max_age) {
            debug!("reusing recent IP position sample");
            return Ok(c);
        }

        debug!(high_accuracy = opts.high_accuracy, "IP position is city-level regardless");
        let url = self.url.clone();
        let user_agent = self.user_agent.clone();
        let timeout = opts.timeout;
        let result = tokio::task::spawn_blocking(move || {
            let response = ureq::get(&url)
                .set("User-Agent", &user_agent)
                .timeout(timeout)
                .call();
            match response {
                Ok(resp) => resp
                    .into_json::<IpApiResult>()
                    .map_err(|_| LocationError::Unavailable)
                    .and_then(parse_ip_response),
                Err(ureq::Error::Status(401 | 403, _)) => Err(LocationError::PermissionDenied),
                Err(_) => Err(LocationError::Unavailable),
            }
        })
        .await
        .map_err(|_| LocationError::Unavailable)?;

        if let Ok(c) = result {
            info!(lat = c.latitude, lon = c.longitude, "IP position acquired");
            self.remember(c);
        }
        result
    }
}
