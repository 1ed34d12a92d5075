pub mod baseline;

pub use baseline::{establish_usual_country, BaselineClassifier, DEFAULT_BASELINE_COUNT};
