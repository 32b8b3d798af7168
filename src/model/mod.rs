pub mod config;

pub use config::{AppConfig, DatasetSettings, InferenceSettings, MapSettings, DEFAULT_FEATURE_NAMES};
