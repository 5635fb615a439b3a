pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod service;

pub use config::{AppConfig, DetectionConfig};
pub use error::{DedupError, Result};
pub use service::{DetectionCoordinator, SubmitOutcome};
