//! Mathematical functions and routines.
//!
//! # Spherical Harmonics
//!
//! The complex spherical harmonics [`sph_harm`] follow the orthonormal convention including the
//! Condon-Shortley phase, i.e.
//!
//! `Y(m, n, θ, φ) = sqrt((2n + 1) / 4π * (n - m)! / (n + m)!) * P(n, m, cos φ) * exp(i m θ)`
//!
//! where `θ` is the azimuthal angle and `φ` the polar angle (co-latitude). Degrees `m > n` have
//! no finite value and evaluate to NaN, which is used to filter invalid index pairs.
//!
//! The associated Legendre functions are never evaluated directly, instead the normalized
//! values are computed with the usual three-term recurrence, which stays stable up to high
//! orders where factorials overflow.

mod sphharm;

pub use sphharm::{LegendreTable, sph_harm};

/// A shorthand for converting constants to type `T`.
macro_rules! T {
    ($value: expr) => {
        T::from_f64($value).unwrap()
    };
}

pub(crate) use T;
