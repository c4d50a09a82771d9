//! URL phishing risk scoring: lexical features, a weighted heuristic, an
//! optional trained classifier and a decision engine that ties them together.

pub mod classifier;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod features;
pub mod heuristic;
pub mod probe;
pub mod routes;
pub mod types;

pub use config::Settings;
pub use engine::DecisionEngine;
pub use error::EngineError;
pub use types::{Outcome, Prediction, Verdict};
