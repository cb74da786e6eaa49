#![warn(missing_docs)]

//! Error types for the geometry library.
//!
//! This module defines error types that can occur when building poses
//! or integrating motion.

use core::fmt;

/// Errors that can occur in geometric calculations.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Error for a coordinate that is NaN or infinite.
    /// This variant is returned when a pose is built from untrusted input.
    NonFiniteValue(&'static str),
    /// Error for a degenerate orientation.
    /// This variant is returned when an orientation vector has zero length.
    DegenerateOrientation(&'static str),
    /// Error for negative time delta.
    /// This variant is returned when a negative time delta is used for pose updates.
    NegativeTimeDelta(&'static str),
}

impl core::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::NonFiniteValue(msg) => write!(f, "Non-finite value: {}", msg),
            GeometryError::DegenerateOrientation(msg) => {
                write!(f, "Degenerate orientation: {}", msg)
            }
            GeometryError::NegativeTimeDelta(msg) => write!(f, "Negative time delta: {}", msg),
        }
    }
}

impl core::error::Error for GeometryError {}
