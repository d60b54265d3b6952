//! Reverse geocoding providers: a structured (Google-style) provider and the
//! free-text OpenStreetMap Nominatim provider.
//!
//! The provider is chosen once, when the geocoder is built. A call never
//! tries the second provider after the first fails.

use super::correction;
use super::types::{Accuracy, Coordinate, LocationError, LocationSource, ResolvedLocation};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Provider-neutral geocoding result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Place {
    pub formatted_address: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub accuracy: Accuracy,
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reverse(&self, c: Coordinate, budget: Duration) -> Result<Place, LocationError>;
}

// ─── HTTP plumbing ──────────────────────────────────────────────

/// GET `url` and decode the body as `T`, off the async runtime.
async fn fetch_json<T>(url: String, user_agent: String, budget: Duration) -> Result<T, LocationError>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let response = ureq::get(&url)
            .set("User-Agent", &user_agent)
            .timeout(budget)
            .call()
            .map_err(|e| LocationError::Provider(e.to_string()))?;

        response
            .into_json::<T>()
            .map_err(|e| LocationError::Provider(format!("malformed response: {}", e)))
    })
    .await
    .map_err(|e| LocationError::Provider(e.to_string()))?
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            _ if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '~' => {
                c.to_string()
            }
            _ => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect()
            }
        })
        .collect()
}

// ─── Structured provider ────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct StructuredResponse {
    status: String,
    #[serde(default)]
    results: Vec<StructuredResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StructuredResult {
    formatted_address: String,
    address_components: Vec<AddressComponent>,
    geometry: Geometry,
}

#[derive(Deserialize, Debug)]
struct AddressComponent {
    long_name: String,
    types: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct Geometry {
    location_type: String,
}

fn component(result: &StructuredResult, kind: &str) -> Option<String> {
    result
        .address_components
        .iter()
        .find(|c| c.types.iter().any(|t| t == kind))
        .map(|c| c.long_name.clone())
}

fn place_from_structured(resp: StructuredResponse) -> Result<Place, LocationError> {
    if resp.status != "OK" {
        let detail = resp.error_message.unwrap_or_default();
        return Err(LocationError::Provider(format!("status {} {}", resp.status, detail).trim().to_string()));
    }
    let top = resp
        .results
        .into_iter()
        .next()
        .ok_or_else(|| LocationError::Provider("empty result list".into()))?;

    let accuracy = if top.geometry.location_type == "ROOFTOP" {
        Accuracy::High
    } else {
        Accuracy::Medium
    };

    Ok(Place {
        city: component(&top, "locality").or_else(|| component(&top, "postal_town")),
        region: component(&top, "administrative_area_level_1"),
        country: component(&top, "country"),
        postal_code: component(&top, "postal_code"),
        formatted_address: top.formatted_address,
        accuracy,
    })
}

/// High-fidelity provider speaking the Google Geocoding JSON format.
pub struct StructuredProvider {
    base_url: String,
    api_key: String,
    user_agent: String,
}

impl StructuredProvider {
    pub fn new(base_url: &str, api_key: &str, user_agent: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for StructuredProvider {
    fn name(&self) -> &'static str {
        "structured"
    }

    async fn reverse(&self, c: Coordinate, budget: Duration) -> Result<Place, LocationError> {
        let url = format!(
            "{}/json?latlng={},{}&key={}",
            self.base_url,
            c.latitude,
            c.longitude,
            urlencode(&self.api_key),
        );
        let resp: StructuredResponse = fetch_json(url, self.user_agent.clone(), budget).await?;
        place_from_structured(resp)
    }
}

// ─── Nominatim provider ─────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct NominatimReverse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    suburb: Option<String>,
    state: Option<String>,
    country: Option<String>,
    postcode: Option<String>,
}

impl NominatimAddress {
    /// First present of city, town, village, municipality, suburb.
    fn settlement(&self) -> Option<String> {
        [&self.city, &self.town, &self.village, &self.municipality, &self.suburb]
            .into_iter()
            .find_map(|f| f.clone())
    }
}

fn place_from_nominatim(resp: NominatimReverse) -> Result<Place, LocationError> {
    if let Some(err) = resp.error {
        return Err(LocationError::Provider(err));
    }
    let display_name = resp
        .display_name
        .ok_or_else(|| LocationError::Provider("missing display_name".into()))?;
    let address = resp.address.unwrap_or_default();

    Ok(Place {
        formatted_address: display_name,
        city: address.settlement(),
        region: address.state,
        country: address.country,
        postal_code: address.postcode,
        accuracy: Accuracy::Medium,
    })
}

/// Free-text provider backed by OpenStreetMap Nominatim.
pub struct NominatimProvider {
    base_url: String,
    user_agent: String,
}

impl NominatimProvider {
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn reverse(&self, c: Coordinate, budget: Duration) -> Result<Place, LocationError> {
        let url = format!(
            "{}/reverse?format=jsonv2&addressdetails=1&lat={}&lon={}",
            self.base_url, c.latitude, c.longitude,
        );
        let resp: NominatimReverse = fetch_json(url, self.user_agent.clone(), budget).await?;
        place_from_nominatim(resp)
    }
}

// ─── Reverse geocoder ───────────────────────────────────────────

/// Coordinate → place, with region correction and graceful degradation.
pub struct ReverseGeocoder {
    provider: Box<dyn GeocodeProvider>,
    budget: Duration,
}

impl ReverseGeocoder {
    /// Prefer `structured` when configured, otherwise use `free_text`.
    pub fn new(
        structured: Option<Box<dyn GeocodeProvider>>,
        free_text: Box<dyn GeocodeProvider>,
        budget: Duration,
    ) -> Self {
        let provider = structured.unwrap_or(free_text);
        info!(provider = provider.name(), "reverse geocoder ready");
        Self { provider, budget }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// One provider call within the budget, then region correction.
    pub async fn try_resolve(&self, c: Coordinate) -> Result<ResolvedLocation, LocationError> {
        let place = tokio::time::timeout(self.budget, self.provider.reverse(c, self.budget))
            .await
            .map_err(|_| LocationError::Provider(format!("no response within {:?}", self.budget)))??;

        let loc = ResolvedLocation {
            coordinate: c,
            formatted_address: place.formatted_address,
            city: place.city,
            region: place.region,
            country: place.country,
            postal_code: place.postal_code,
            source: LocationSource::Sensor,
            accuracy: place.accuracy,
            resolved_at: Utc::now(),
        };
        Ok(correction::correct(loc))
    }

    /// Like [`try_resolve`](Self::try_resolve), but a failed lookup yields a
    /// coordinate-only location instead of an error.
    pub async fn resolve(&self, c: Coordinate) -> ResolvedLocation {
        match self.try_resolve(c).await {
            Ok(loc) => {
                debug!(city = ?loc.city, accuracy = ?loc.accuracy, "geocoded");
                loc
            }
            Err(e) => {
                warn!(provider = self.provider.name(), "reverse geocoding failed: {}", e);
                ResolvedLocation::bare(c, LocationSource::Sensor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubProvider {
        name: &'static str,
        result: Result<Place, LocationError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GeocodeProvider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn reverse(&self, _c: Coordinate, _budget: Duration) -> Result<Place, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn stub(
        name: &'static str,
        result: Result<Place, LocationError>,
    ) -> (Box<dyn GeocodeProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Box::new(StubProvider { name, result, calls: calls.clone() }), calls)
    }

    fn place(city: &str) -> Place {
        Place {
            formatted_address: format!("Somewhere, {}", city),
            city: Some(city.to_string()),
            accuracy: Accuracy::Medium,
            ..Place::default()
        }
    }

    #[tokio::test]
    async fn test_structured_preferred_and_fallback_untouched() {
        let (structured, s_calls) = stub("structured", Err(LocationError::Provider("down".into())));
        let (free, f_calls) = stub("nominatim", Ok(place("Berlin")));
        let geocoder = ReverseGeocoder::new(Some(structured), free, Duration::from_secs(1));

        let c = Coordinate::new(52.52, 13.405).unwrap();
        let loc = geocoder.resolve(c).await;

        assert_eq!(geocoder.provider_name(), "structured");
        assert_eq!(s_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f_calls.load(Ordering::SeqCst), 0);
        assert_eq!(loc.city, None);
    }

    #[tokio::test]
    async fn test_free_text_used_without_structured() {
        let (free, _) = stub("nominatim", Ok(place("Berlin")));
        let geocoder = ReverseGeocoder::new(None, free, Duration::from_secs(1));
        let loc = geocoder.resolve(Coordinate::new(52.52, 13.405).unwrap()).await;
        assert_eq!(loc.city.as_deref(), Some("Berlin"));
        assert_eq!(loc.accuracy, Accuracy::Medium);
        assert_eq!(loc.source, LocationSource::Sensor);
    }

    #[tokio::test]
    async fn test_geocode_result_is_region_corrected() {
        let (free, _) = stub("nominatim", Ok(place("Ludwigshafen am Rhein")));
        let geocoder = ReverseGeocoder::new(None, free, Duration::from_secs(1));
        let loc = geocoder.resolve(Coordinate::new(49.4875, 8.4660).unwrap()).await;
        assert_eq!(loc.city.as_deref(), Some("Mannheim"));
        assert_eq!(loc.accuracy, Accuracy::Corrected);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_coordinate_text() {
        let (free, _) = stub("nominatim", Err(LocationError::Provider("boom".into())));
        let geocoder = ReverseGeocoder::new(None, free, Duration::from_secs(1));
        let loc = geocoder.resolve(Coordinate::new(49.487512, 8.466049).unwrap()).await;
        assert_eq!(loc.formatted_address, "49.4875, 8.4660");
        assert_eq!(loc.city, None);
        assert_eq!(loc.accuracy, Accuracy::Unknown);
    }

    struct StalledProvider;

    #[async_trait]
    impl GeocodeProvider for StalledProvider {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn reverse(&self, _c: Coordinate, _budget: Duration) -> Result<Place, LocationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(place("Berlin"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exceeded_degrades() {
        let geocoder = ReverseGeocoder::new(None, Box::new(StalledProvider), Duration::from_millis(8000));
        let c = Coordinate::new(52.52, 13.405).unwrap();

        assert!(matches!(geocoder.try_resolve(c).await, Err(LocationError::Provider(_))));

        let loc = geocoder.resolve(c).await;
        assert_eq!(loc.formatted_address, "52.5200, 13.4050");
        assert_eq!(loc.city, None);
        assert_eq!(loc.accuracy, Accuracy::Unknown);
        assert_eq!(loc.source, LocationSource::Sensor);
    }

    #[test]
    fn test_nominatim_settlement_order() {
        let json = r#"{
            "display_name": "Hauptstraße 5, Edingen-Neckarhausen, Baden-Württemberg, 68535, Deutschland",
            "address": {
                "village": "Neckarhausen",
                "municipality": "Edingen-Neckarhausen",
                "suburb": "Mitte",
                "state": "Baden-Württemberg",
                "postcode": "68535",
                "country": "Deutschland"
            }
        }"#;
        let place = place_from_nominatim(serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(place.city.as_deref(), Some("Neckarhausen"));
        assert_eq!(place.region.as_deref(), Some("Baden-Württemberg"));
        assert_eq!(place.postal_code.as_deref(), Some("68535"));
    }

    #[test]
    fn test_nominatim_error_body() {
        let resp: NominatimReverse = serde_json::from_str(r#"{"error":"Unable to geocode"}"#).unwrap();
        assert_eq!(
            place_from_nominatim(resp),
            Err(LocationError::Provider("Unable to geocode".into()))
        );
    }

    #[test]
    fn test_nominatim_missing_display_name_rejected() {
        let resp: NominatimReverse = serde_json::from_str(r#"{"address":{"city":"Worms"}}"#).unwrap();
        assert!(place_from_nominatim(resp).is_err());
    }

    #[test]
    fn test_structured_components() {
        let json = r#"{
            "status": "OK",
            "results": [{
                "formatted_address": "Willy-Brandt-Platz 17, 68161 Mannheim, Germany",
                "geometry": { "location_type": "ROOFTOP" },
                "address_components": [
                    { "long_name": "17", "types": ["street_number"] },
                    { "long_name": "Mannheim", "types": ["locality", "political"] },
                    { "long_name": "Baden-Württemberg", "types": ["administrative_area_level_1", "political"] },
                    { "long_name": "Germany", "types": ["country", "political"] },
                    { "long_name": "68161", "types": ["postal_code"] }
                ]
            }]
        }"#;
        let place = place_from_structured(serde_json::from_str(json).unwrap()).unwrap();
        assert_eq!(place.city.as_deref(), Some("Mannheim"));
        assert_eq!(place.country.as_deref(), Some("Germany"));
        assert_eq!(place.postal_code.as_deref(), Some("68161"));
        assert_eq!(place.accuracy, Accuracy::High);
    }

    #[test]
    fn test_structured_bad_status() {
        let resp: StructuredResponse =
            serde_json::from_str(r#"{"status":"ZERO_RESULTS","results":[]}"#).unwrap();
        assert!(matches!(place_from_structured(resp), Err(LocationError::Provider(_))));
    }

    #[test]
    fn test_structured_schema_is_strict() {
        // A result without geometry does not parse.
        let json = r#"{"status":"OK","results":[{"formatted_address":"x","address_components":[]}]}"#;
        assert!(serde_json::from_str::<StructuredResponse>(json).is_err());
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("ab-C_1.~"), "ab-C_1.~");
        assert_eq!(urlencode("a b&c"), "a%20b%26c");
        assert_eq!(urlencode("ä"), "%C3%A4");
    }
}
