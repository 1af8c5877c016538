pub mod aggregator;
pub mod baseline;
pub mod calibration;
pub mod consensus;
pub mod curve_cache;
pub mod kelly;
pub mod performance;
pub mod pipeline;
pub mod ratings;
pub mod tracker;

pub use pipeline::{EngineSettings, PredictionEngine};
