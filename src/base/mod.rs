//! # Core building blocks of the **mosgim** inversion.
//!
//! # Observations
//!
//! Differenced TEC observations are represented by the [`TecObsSeries`] type, a structure of nine
//! index-aligned arrays (current ray, reference ray and the right-hand side). Index alignment is
//! an invariant of the type, it is checked on construction and kept by [`TecObsSeries::split`].
//!
//! # Settings
//!
//! All inversion parameters are collected within [`InversionSettings`], which is created using the
//! [`InversionSettingsBuilder`] or deserialized from a JSON5 file. Unset values fall back to the
//! defaults listed in this module.

mod series;
mod settings;

pub use series::*;
pub use settings::*;

use thiserror::Error;

/// Mean Earth radius (in meters).
pub const EARTH_RADIUS: f64 = 6371200.0;

/// Height of the thin ionospheric shell (in meters).
pub const IPP_HEIGHT: f64 = 450000.0;

/// Measurement noise at zenith (in TECU).
pub const SIGMA0: f64 = 0.075;

/// Allowed variability of each coefficient between two consecutive maps (in TECU).
pub const SIGMA_V: f64 = 0.015;

/// Number of observations per chunk, per gigabyte of worker memory.
pub const GB_CHUNK: usize = 15000;

/// Number of seconds in a day.
pub const SECONDS_PER_DAY: f64 = 86400.0;

/// Errors associated with the **mosgim** inversion.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MosgimError<T> {
    #[error("failed to build settings: {0}")]
    Builder(String),
    #[error("elevation {el} in \"{field}\" at index {index} is not positive")]
    ElevationOutOfRange {
        field: &'static str,
        index: usize,
        el: T,
    },
    #[error("invalid input shape for \"{field}\": found {found} elements but expected {expected}")]
    InputShape {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("failed to read or write file")]
    Io(#[from] std::io::Error),
    #[error("invalid setting \"{name}\": {msg}")]
    InvalidSetting { name: &'static str, msg: String },
    #[error("non-finite value in \"{field}\" at index {index}")]
    NonFinite { field: &'static str, index: usize },
    #[error("solution of the {dimension} x {dimension} normal system contains non-finite values")]
    NonFiniteSolution { dimension: usize },
    #[error("failed to (de)serialize: {0}")]
    Serde(String),
    #[error(
        "normal system ({dimension} x {dimension}, stacked from {chunks} chunks) is singular \
        or ill-conditioned (pivot ratio {pivot_ratio})"
    )]
    SingularMatrix {
        dimension: usize,
        chunks: usize,
        pivot_ratio: T,
    },
    #[error("failed to create worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("time {time:.1} sec in \"{field}\" at index {index} is outside of [0, {window:.1}) sec")]
    TimeOutOfRange {
        field: &'static str,
        index: usize,
        time: T,
        window: T,
    },
    #[error("unsupported magnetic coordinate type \"{0}\"")]
    UnsupportedCoords(String),
}

impl<T> MosgimError<T> {
    /// Returns `true` if the error is caused by malformed input data.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ElevationOutOfRange { .. }
                | Self::InputShape { .. }
                | Self::NonFinite { .. }
                | Self::TimeOutOfRange { .. }
        )
    }

    /// Returns `true` if the error is caused by an invalid configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Builder(_)
                | Self::InvalidSetting { .. }
                | Self::ThreadPool(_)
                | Self::UnsupportedCoords(_)
        )
    }

    /// Returns `true` if the error is caused by a numerical failure of the solver.
    pub fn is_numerical_error(&self) -> bool {
        matches!(
            self,
            Self::SingularMatrix { .. } | Self::NonFiniteSolution { .. }
        )
    }
}

impl<T> From<InversionSettingsBuilderError> for MosgimError<T> {
    fn from(value: InversionSettingsBuilderError) -> Self {
        Self::Builder(value.to_string())
    }
}
