use crate::location::{SharedConsent, SmartLocationResolver};
use std::sync::Arc;

pub struct AppState {
    pub resolver: Arc<SmartLocationResolver>,
    pub consent: SharedConsent,
}
