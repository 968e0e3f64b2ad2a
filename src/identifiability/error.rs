use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NeighbourhoodError {
    #[error("Multiplier grid is empty")]
    EmptyGrid,
    #[error("Multiplier grid contains the non-finite value {0}")]
    NonFinite(f64),
    #[error("Multiplier grid must be strictly increasing, found {previous} followed by {next}")]
    NotIncreasing { previous: f64, next: f64 },
    #[error("Invalid multiplier grid '{input}': {message}")]
    Parse { input: String, message: String },
}
