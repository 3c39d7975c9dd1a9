//! Error taxonomy for the aggregation, baseline, excess and interpolation stages.
//!
//! Every variant is a contract violation reported to the caller immediately;
//! nothing in the core substitutes a default or a NaN.

use thiserror::Error;

use crate::records::StratKey;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MortalityError {
    /// A cubic spline needs at least four samples.
    #[error("insufficient data for {context}: got {got} points, need {need}")]
    InsufficientData {
        context: String,
        got: usize,
        need: usize,
    },

    /// An interpolant was evaluated outside the domain it was built on.
    #[error("day {x} is outside the interpolation domain [{min}, {max}]")]
    OutOfDomain { x: f64, min: f64, max: f64 },

    /// Excess was requested where the target year and baseline do not overlap.
    #[error("excess is undefined for key {key} at day {day}")]
    UndefinedExcess { key: StratKey, day: u16 },

    /// The key occurs in the target year but in no reference year.
    #[error("key {0} has no reference-year data")]
    DisjointKey(StratKey),

    /// Interpolation samples must be strictly increasing in day-of-year.
    #[error("samples for {context} are not strictly increasing at day {day}")]
    NotIncreasing { context: String, day: f64 },
}

/// Result type for the core pipeline stages.
pub type Result<T> = std::result::Result<T, MortalityError>;
