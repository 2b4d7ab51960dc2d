//! Core engine: sample a population, predict clicks, compute CTR.

pub mod predictor;

pub use predictor::{ClickPredictor, PredictorConfig};
