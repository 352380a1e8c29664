//! Boundaries to the external capabilities a submission depends on.
//!
//! Every adapter normalizes its remote response into typed results here, so
//! nothing past this module sees raw JSON from a third party.

pub mod assessor;
pub mod detector;
pub mod geocoder;

pub use assessor::{Assessor, ChatAssessor};
pub use detector::{Detector, DetectorError, HttpDetector};
pub use geocoder::{GeocodeError, Geocoder, NominatimGeocoder};
