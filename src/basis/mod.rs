//! # Real spherical harmonic basis.
//!
//! The [`HarmonicIndices`] type holds the filtered set of index pairs `(M, N)`, with degree
//! `M ∈ [-mbig, mbig]` and order `N ∈ [0, nbig]`, for which the spherical harmonics are finite.
//! The set is ordered by `N` first and `M` second, which defines the column order of each time
//! slice within the design matrix.
//!
//! The real basis element for each pair is derived from the complex harmonic `Y(|M|, N, θ, φ)`:
//! - `Im(Y) * √2 * (-1)^M` for `M < 0`,
//! - `Re(Y) * √2 * (-1)^M` for `M > 0`,
//! - `Re(Y)` for `M = 0`.
//!
//! Slant observations are mapped onto the vertical basis with the [`SlantFactor`] of a thin
//! ionospheric shell.

use crate::{
    base::InversionSettings,
    math::{LegendreTable, T, sph_harm},
};
use itertools::zip_eq;
use nalgebra::{Complex, DMatrix, DVector, RealField};
use serde::{Deserialize, Serialize};

/// The filtered set of spherical harmonic index pairs `(M, N)`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HarmonicIndices {
    /// Degrees `M`.
    m: Vec<i32>,
    /// Orders `N`.
    n: Vec<usize>,
    /// Maximum order.
    nbig: usize,
    /// Maximum degree.
    mbig: usize,
}

impl HarmonicIndices {
    /// Evaluate the real basis vector at the angle `theta` and co-latitude `phi`.
    pub fn evaluate<T>(&self, theta: T, phi: T) -> DVector<T>
    where
        T: Copy + RealField,
    {
        let table = LegendreTable::new(self.nbig, self.mbig, phi);
        let sqrt2 = T!(2.0).sqrt();

        DVector::from_iterator(
            self.len(),
            zip_eq(&self.m, &self.n).map(|(&m, &n)| {
                let m_abs = m.unsigned_abs() as usize;
                let arg = T::from_usize(m_abs).unwrap() * theta;

                let q = table.get(n, m_abs);
                let ymn = Complex::new(q * arg.cos(), q * arg.sin());

                let sign = if m_abs % 2 == 0 { T::one() } else { -T::one() };

                match m.signum() {
                    -1 => ymn.im * sqrt2 * sign,
                    1 => ymn.re * sqrt2 * sign,
                    _ => ymn.re,
                }
            }),
        )
    }

    /// Evaluate the real basis vectors for a series of directions, scaled by an optional
    /// per-direction slant factor.
    ///
    /// Returns a matrix with one row per direction.
    pub fn evaluate_matrix<T>(&self, theta: &[T], phi: &[T], opt_sf: Option<&[T]>) -> DMatrix<T>
    where
        T: Copy + RealField,
    {
        let mut matrix = DMatrix::<T>::zeros(theta.len(), self.len());

        zip_eq(theta, phi)
            .zip(matrix.row_iter_mut())
            .enumerate()
            .for_each(|(idx, ((theta, phi), mut row))| {
                let values = match opt_sf {
                    Some(sf) => self.evaluate(*theta, *phi) * sf[idx],
                    None => self.evaluate(*theta, *phi),
                };

                row.copy_from(&values.transpose());
            });

        matrix
    }

    /// Evaluate the real basis vector, scaled by the slant factor `sf`.
    pub fn evaluate_slant<T>(&self, theta: T, phi: T, sf: T) -> DVector<T>
    where
        T: Copy + RealField,
    {
        self.evaluate(theta, phi) * sf
    }

    /// Returns `true` if the set holds no index pairs.
    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    /// Returns an iterator over all index pairs `(M, N)`.
    pub fn iter(&self) -> impl Iterator<Item = (i32, usize)> + '_ {
        zip_eq(self.m.iter().copied(), self.n.iter().copied())
    }

    /// Returns the number of basis functions `n_coefs`.
    pub fn len(&self) -> usize {
        self.m.len()
    }

    /// Create the filtered index set for maximum order `nbig` and maximum degree `mbig`.
    ///
    /// Index pairs whose harmonic does not evaluate to a finite value are removed.
    pub fn new(nbig: usize, mbig: usize) -> Self {
        let mut m = Vec::new();
        let mut n = Vec::new();

        for order in 0..=nbig {
            for degree in -(mbig as i32)..=(mbig as i32) {
                let value =
                    sph_harm(degree.unsigned_abs() as usize, order, 0.0_f64, 0.0_f64);

                if value.re.is_finite() && value.im.is_finite() {
                    m.push(degree);
                    n.push(order);
                }
            }
        }

        Self { m, n, nbig, mbig }
    }

    /// Create the filtered index set from the inversion settings.
    pub fn from_settings<T>(settings: &InversionSettings<T>) -> Self
    where
        T: Copy + RealField,
    {
        Self::new(settings.y_order, settings.y_degree)
    }
}

/// The slant (mapping) factor of a thin-shell ionosphere.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SlantFactor<T> {
    earth_radius: T,
    ipp_height: T,
}

impl<T> SlantFactor<T>
where
    T: Copy + RealField,
{
    /// Evaluate the slant factor for the elevation angle `el` (in radians).
    pub fn evaluate(&self, el: T) -> T {
        let ratio = self.earth_radius * el.cos() / (self.earth_radius + self.ipp_height);

        T::one() / (T::one() - ratio * ratio).sqrt()
    }

    /// Evaluate the slant factors for a series of elevation angles.
    pub fn evaluate_all(&self, el: &[T]) -> Vec<T> {
        el.iter().map(|el| self.evaluate(*el)).collect()
    }

    /// Create the slant factor from the inversion settings.
    pub fn from_settings(settings: &InversionSettings<T>) -> Self {
        Self::new(settings.earth_radius, settings.ipp_height)
    }

    /// Create a new [`SlantFactor`].
    pub fn new(earth_radius: T, ipp_height: T) -> Self {
        Self {
            earth_radius,
            ipp_height,
        }
    }
}
