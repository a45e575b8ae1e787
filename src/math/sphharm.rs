use crate::math::T;
use nalgebra::{Complex, DMatrix, RealField};

/// A table of fully normalized associated Legendre functions `Q(n, m, cos φ)` for
/// `0 <= m <= n <= nbig`, evaluated for a single polar angle `φ`.
///
/// The normalization includes the `1 / sqrt(4π)` factor and the Condon-Shortley phase, so that
/// `Q(n, m) * exp(i m θ)` is the orthonormal complex spherical harmonic.
#[derive(Clone, Debug)]
pub struct LegendreTable<T> {
    /// Table values, stored as (n, m).
    values: DMatrix<T>,
}

impl<T> LegendreTable<T>
where
    T: Copy + RealField,
{
    /// Evaluate the table for all orders up to `nbig` and degrees up to `mbig` at co-latitude `phi`.
    pub fn new(nbig: usize, mbig: usize, phi: T) -> Self {
        let mbig = mbig.min(nbig);

        let x = phi.cos();
        let s = phi.sin();

        let mut values = DMatrix::<T>::zeros(nbig + 1, mbig + 1);

        values[(0, 0)] = T::one() / (T::two_pi() * T!(2.0)).sqrt();

        // Sectoral terms Q(m, m).
        for m in 1..=mbig {
            let mf = T::from_usize(m).unwrap();

            values[(m, m)] =
                -s * ((T!(2.0) * mf + T::one()) / (T!(2.0) * mf)).sqrt() * values[(m - 1, m - 1)];
        }

        for m in 0..=mbig {
            let mf = T::from_usize(m).unwrap();

            if m < nbig {
                values[(m + 1, m)] = x * (T!(2.0) * mf + T!(3.0)).sqrt() * values[(m, m)];
            }

            for n in (m + 2)..=nbig {
                let nf = T::from_usize(n).unwrap();
                let nm1 = nf - T::one();

                let a = ((T!(4.0) * nf * nf - T::one()) / (nf * nf - mf * mf)).sqrt();
                let b = ((nm1 * nm1 - mf * mf) / (T!(4.0) * nm1 * nm1 - T::one())).sqrt();

                values[(n, m)] = a * (x * values[(n - 1, m)] - b * values[(n - 2, m)]);
            }
        }

        Self { values }
    }

    /// Returns `Q(n, m)`, or NaN if `(n, m)` lies outside of the valid range.
    pub fn get(&self, n: usize, m: usize) -> T {
        if (m > n) || (n >= self.values.nrows()) || (m >= self.values.ncols()) {
            (-T::one()).sqrt()
        } else {
            self.values[(n, m)]
        }
    }
}

/// Evaluates the complex spherical harmonic of degree `m` and order `n` at the azimuthal angle
/// `theta` and polar angle `phi`.
///
/// Returns NaN components for `m > n`.
pub fn sph_harm<T>(m: usize, n: usize, theta: T, phi: T) -> Complex<T>
where
    T: Copy + RealField,
{
    let q = LegendreTable::new(n, m, phi).get(n, m);
    let arg = T::from_usize(m).unwrap() * theta;

    Complex::new(q * arg.cos(), q * arg.sin())
}
