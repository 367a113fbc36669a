//! Errors
//!
//! Custom error types used throughout the `mtp` crate.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort an estimation call.
#[derive(Debug, Error)]
pub enum MtpError {
    /// Invalid static inputs (fold count, mismatched node lengths, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A named column is not present in the observation table.
    #[error("Column {0} was not found in the data.")]
    MissingColumn(String),
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Runtime data problems, such as a missing value before censoring.
    #[error("Data error: {0}")]
    Data(String),
    /// A learner could not be fit.
    #[error("Learner failed: {0}")]
    Learner(String),
    /// Unable to write a configuration or result.
    #[error("Unable to write: {0}")]
    UnableToWrite(String),
    /// Unable to read a configuration.
    #[error("Unable to read: {0}")]
    UnableToRead(String),
}

impl MtpError {
    /// True for the error classes that describe invalid static inputs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MtpError::Configuration(_) | MtpError::MissingColumn(_) | MtpError::InvalidParameter(..)
        )
    }
}

/// Non-fatal numeric conditions, reported on the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumericWarning {
    /// Classifier probabilities were clipped before computing odds.
    RatioClipped { count: usize },
    /// Outcome predictions were bounded away from 0 and 1.
    OutcomeClipped { count: usize },
    /// Cumulative density ratios were capped.
    RatioTrimmed { count: usize, cap: f64 },
}

impl std::fmt::Display for NumericWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericWarning::RatioClipped { count } => {
                write!(f, "{} classifier probabilities were clipped before computing density ratios", count)
            }
            NumericWarning::OutcomeClipped { count } => {
                write!(f, "{} outcome predictions were bounded away from 0 and 1", count)
            }
            NumericWarning::RatioTrimmed { count, cap } => {
                write!(f, "{} cumulative density ratios were trimmed at {:.4}", count, cap)
            }
        }
    }
}
