//! Location intelligence for pickup-station search.
//!
//! Resolves where the user is from cached choices, the device position, and
//! reverse geocoding with regional correction, then ranks nearby stations.

pub mod cache;
pub mod correction;
pub mod providers;
pub mod ranking;
pub mod resolver;
pub mod sensor;
pub mod types;

pub use cache::{ConsentFlag, LocationCache, SharedConsent, Slot};
pub use providers::{GeocodeProvider, NominatimProvider, ReverseGeocoder, StructuredProvider};
pub use resolver::{DefaultLocation, SmartLocationResolver};
pub use sensor::{FixedSensor, IpSensor, NullSensor, PositionAcquirer, SensorOptions};
pub use types::{
    Accuracy, Coordinate, FallbackReason, LocationError, LocationSource, RankOptions, RankedStation,
    Resolution, ResolvedLocation, Station,
};
