use crate::{
    base::{InversionSettings, MosgimError, TecObsSeries},
    basis::{HarmonicIndices, SlantFactor},
};
use itertools::izip;
use log::debug;
use nalgebra::{DMatrix, DVector, RealField};
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::{
    ops::{Add, AddAssign},
    time::Instant,
};

/// The temporal basis that couples an observation time to the coefficient time slices.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum TemporalBasis {
    /// Piecewise-constant, each observation contributes to the time slice of its bin only.
    Constant,
    /// Piecewise-linear, each observation is interpolated between the two bracketing slices.
    /// Requires one additional trailing time slice.
    ///
    /// For a fractional position `frac` inside bin `k`, slice `k` receives the weight `1 - frac`
    /// and slice `k + 1` receives `frac`, so that slice `k` holds the map at the start of bin `k`
    /// (see [`crate::maps::map_time`]). Solvers that assign `frac` to slice `k` instead produce
    /// different coefficient vectors for the same observations.
    Linear,
}

impl TemporalBasis {
    /// Returns the slices and interpolation factors for an observation at `time`.
    ///
    /// Returns `None` if the time maps to a bin outside of `[0, nT - 1]`.
    pub fn blocks<T>(&self, time: T, settings: &InversionSettings<T>) -> Option<Vec<(usize, T)>>
    where
        T: Copy + RealField + AsPrimitive<usize>,
    {
        let nt = settings.number_time_steps;
        let dt = settings.bin_width();

        let position = time / dt;

        if !position.is_finite() || (position < T::zero()) {
            return None;
        }

        let bin: usize = position.floor().as_();

        if bin >= nt {
            return None;
        }

        match self {
            Self::Constant => Some(vec![(bin, T::one())]),
            Self::Linear => {
                let frac = position - T::from_usize(bin).unwrap();

                Some(vec![(bin, T::one() - frac), (bin + 1, frac)])
            }
        }
    }

    /// Number of additional trailing time slices.
    pub fn extra_slices(&self) -> usize {
        match self {
            Self::Constant => 0,
            Self::Linear => 1,
        }
    }
}

/// A single row of the block-sparse design matrix.
///
/// Each block is a dense vector of `n_coefs` values that starts at the column
/// `slice * n_coefs`. Blocks are unique per slice.
#[derive(Clone, Debug)]
pub struct DesignRow<T> {
    blocks: Vec<(usize, DVector<T>)>,
}

impl<T> DesignRow<T>
where
    T: Copy + RealField,
{
    /// Returns the (slice, values) blocks of the row.
    pub fn blocks(&self) -> &[(usize, DVector<T>)] {
        &self.blocks
    }

    /// Add `values` scaled by `factor` to the block of time slice `slice`.
    fn push(&mut self, slice: usize, values: &DVector<T>, factor: T) {
        match self.blocks.iter_mut().find(|(sdx, _)| *sdx == slice) {
            Some((_, block)) => block.axpy(factor, values, T::one()),
            None => self.blocks.push((slice, values * factor)),
        }
    }
}

/// A block-sparse design matrix for a chunk of observations, together with the diagonal of the
/// observation weight matrix.
#[derive(Clone, Debug)]
pub struct DesignMatrix<T> {
    n_coefs: usize,
    rows: Vec<DesignRow<T>>,
    slices: usize,
    weights: Vec<T>,
}

impl<T> DesignMatrix<T>
where
    T: Copy + RealField + AsPrimitive<usize>,
{
    /// Assemble the design matrix and observation weights for a series of observations.
    ///
    /// The current ray enters each row with a positive sign, the reference ray with a negative
    /// sign.
    pub fn assemble(
        series: &TecObsSeries<T>,
        indices: &HarmonicIndices,
        settings: &InversionSettings<T>,
    ) -> Result<Self, MosgimError<T>> {
        let n_coefs = indices.len();
        let basis = settings.temporal_basis();
        let slant = SlantFactor::from_settings(settings);

        let rows = series
            .iter()
            .enumerate()
            .map(|(idx, obs)| -> Result<DesignRow<T>, MosgimError<T>> {
                let ac = indices.evaluate_slant(obs.mlt, obs.mcolat, slant.evaluate(obs.el));
                let ar = indices.evaluate_slant(
                    obs.mlt_ref,
                    obs.mcolat_ref,
                    slant.evaluate(obs.el_ref),
                );

                let mut row = DesignRow {
                    blocks: Vec::with_capacity(4),
                };

                for (field, time, values, sign) in [
                    ("time", obs.time, &ac, T::one()),
                    ("time_ref", obs.time_ref, &ar, -T::one()),
                ] {
                    let blocks =
                        basis
                            .blocks(time, settings)
                            .ok_or(MosgimError::TimeOutOfRange {
                                field,
                                index: idx,
                                time,
                                window: settings.window(),
                            })?;

                    for (slice, factor) in blocks {
                        row.push(slice, values, sign * factor);
                    }
                }

                Ok(row)
            })
            .collect::<Result<Vec<DesignRow<T>>, MosgimError<T>>>()?;

        Ok(Self {
            n_coefs,
            rows,
            slices: settings.slices(),
            weights: observation_weights(series.el(), series.el_ref()),
        })
    }

    /// Returns the number of columns.
    pub fn ncols(&self) -> usize {
        self.n_coefs * self.slices
    }

    /// Returns the number of rows.
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    /// Computes the matrix-vector product `A * x`.
    pub fn mul_vector(&self, x: &DVector<T>) -> DVector<T> {
        let n_coefs = self.n_coefs;

        DVector::from_iterator(
            self.rows.len(),
            self.rows.iter().map(|row| {
                row.blocks
                    .iter()
                    .fold(T::zero(), |acc, (slice, block)| {
                        acc + block.dot(&x.rows(slice * n_coefs, n_coefs))
                    })
            }),
        )
    }

    /// Reduce the design matrix to the normal system `(A^T * P * A, A^T * P * rhs)`.
    pub fn normal_system(&self, rhs: &[T]) -> NormalSystem<T> {
        let n_coefs = self.n_coefs;
        let mut normal = NormalSystem::zeros(self.ncols());

        izip!(&self.rows, &self.weights, rhs).for_each(|(row, weight, value)| {
            for (slice_a, block_a) in &row.blocks {
                normal
                    .vector
                    .rows_mut(slice_a * n_coefs, n_coefs)
                    .axpy(*weight * *value, block_a, T::one());

                for (slice_b, block_b) in &row.blocks {
                    normal
                        .matrix
                        .view_mut((slice_a * n_coefs, slice_b * n_coefs), (n_coefs, n_coefs))
                        .ger(*weight, block_a, block_b, T::one());
                }
            }
        });

        normal
    }

    /// Returns the rows of the design matrix.
    pub fn rows(&self) -> &[DesignRow<T>] {
        &self.rows
    }

    /// Returns the diagonal of the observation weight matrix.
    pub fn weights(&self) -> &[T] {
        &self.weights
    }
}

/// A (partial) normal system `N * x = b`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct NormalSystem<T>
where
    T: Copy + RealField,
{
    /// The symmetric normal matrix `N`.
    pub matrix: DMatrix<T>,

    /// The right-hand side `b`.
    pub vector: DVector<T>,
}

impl<T> NormalSystem<T>
where
    T: Copy + RealField,
{
    /// Returns the number of unknowns.
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Create an all-zero normal system with `dimension` unknowns.
    pub fn zeros(dimension: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(dimension, dimension),
            vector: DVector::zeros(dimension),
        }
    }
}

impl<T> Add for NormalSystem<T>
where
    T: Copy + RealField,
{
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;

        self
    }
}

impl<T> AddAssign for NormalSystem<T>
where
    T: Copy + RealField,
{
    fn add_assign(&mut self, rhs: Self) {
        self.matrix += rhs.matrix;
        self.vector += rhs.vector;
    }
}

/// Computes the diagonal of the observation weight matrix,
/// `w = sin²(el) * sin²(el_ref) / (sin²(el) + sin²(el_ref))`.
pub fn observation_weights<T>(el: &[T], el_ref: &[T]) -> Vec<T>
where
    T: Copy + RealField,
{
    el.iter()
        .zip(el_ref.iter())
        .map(|(el, el_ref)| {
            let s2 = el.sin().powi(2);
            let r2 = el_ref.sin().powi(2);

            s2 * r2 / (s2 + r2)
        })
        .collect()
}

/// Build the partial normal system for a single chunk of observations.
///
/// An empty chunk yields an all-zero normal system of the full dimension.
pub fn construct_normal_system<T>(
    series: &TecObsSeries<T>,
    indices: &HarmonicIndices,
    settings: &InversionSettings<T>,
) -> Result<NormalSystem<T>, MosgimError<T>>
where
    T: Copy + RealField + AsPrimitive<usize>,
{
    let start = Instant::now();

    let design = DesignMatrix::assemble(series, indices, settings)?;
    let normal = design.normal_system(series.rhs());

    debug!(
        "construct_normal_system: {} observations x {} columns ({} coefs, {} slices) in {:.2} sec",
        design.nrows(),
        design.ncols(),
        indices.len(),
        settings.slices(),
        start.elapsed().as_millis() as f64 / 1e3
    );

    Ok(normal)
}
