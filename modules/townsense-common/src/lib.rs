pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use config::{Config, NotifyConfig, Policy};
pub use error::IntakeError;
pub use geo::*;
pub use types::*;
