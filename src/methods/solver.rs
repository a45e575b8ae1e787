use crate::{
    base::{InversionSettings, MosgimError, TecObsSeries},
    basis::HarmonicIndices,
    math::T,
    methods::{NormalSystem, construct_normal_system},
};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, DVectorView, RealField};
use num_traits::AsPrimitive;
use rayon::{ThreadPoolBuilder, prelude::*};
use serde::{Deserialize, Serialize};
use std::{io::Write, path::Path, time::Instant};

/// The solved coefficient vector together with the regularized normal matrix.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct InversionResult<T>
where
    T: Copy + RealField,
{
    /// Coefficient vector, ordered by time slice first and harmonic index second.
    pub res: DVector<T>,

    /// The regularized normal matrix.
    #[serde(rename = "N")]
    pub normal: DMatrix<T>,

    /// Number of spherical harmonic coefficients per time slice.
    pub n_coefs: usize,

    /// Number of time slices.
    pub slices: usize,

    /// Piecewise-linear temporal basis flag.
    pub linear: bool,
}

impl<T> InversionResult<T>
where
    T: Copy + RealField,
{
    /// Deserialize a result from a JSON5 file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MosgimError<T>>
    where
        Self: for<'de> Deserialize<'de>,
    {
        let content = std::fs::read_to_string(path)?;

        serde_json5::from_str(&content).map_err(|err| MosgimError::Serde(err.to_string()))
    }

    /// Serialize the result to a JSON5 file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MosgimError<T>>
    where
        Self: Serialize,
    {
        let mut file = std::fs::File::create(path)?;

        file.write_all(
            serde_json5::to_string(&self)
                .map_err(|err| MosgimError::Serde(err.to_string()))?
                .as_bytes(),
        )?;

        Ok(())
    }

    /// Returns the coefficient block of time slice `k`.
    pub fn time_slice(&self, k: usize) -> Option<DVectorView<'_, T>> {
        (k < self.slices).then(|| self.res.rows(k * self.n_coefs, self.n_coefs))
    }
}

/// Impose the temporal smoothness constraints between consecutive time slices.
///
/// For each adjacent pair of slices and each harmonic index the penalty
/// `weight * (x[ii, kk] - x[ii + 1, kk])^2` is added to the normal matrix.
pub fn apply_temporal_constraints<T>(
    matrix: &mut DMatrix<T>,
    n_coefs: usize,
    slices: usize,
    weight: T,
) where
    T: Copy + RealField,
{
    for ii in 0..slices.saturating_sub(1) {
        for kk in 0..n_coefs {
            let current = ii * n_coefs + kk;
            let next = (ii + 1) * n_coefs + kk;

            matrix[(current, current)] += weight;
            matrix[(next, next)] += weight;
            matrix[(next, current)] -= weight;
            matrix[(current, next)] -= weight;
        }
    }
}

/// Solve the dense normal system `N * x = b` with an LU decomposition.
///
/// Fails if the matrix is singular or too ill-conditioned to give a meaningful solution.
pub fn solve_normal_system<T>(
    normal: &NormalSystem<T>,
    chunks: usize,
) -> Result<DVector<T>, MosgimError<T>>
where
    T: Copy + RealField,
{
    let start = Instant::now();
    let dimension = normal.dimension();

    let lu = normal.matrix.clone().lu();

    let pivots = lu.u().diagonal();

    let pivot_min = pivots.amin();
    let pivot_max = pivots.amax();

    let pivot_ratio = if pivot_max > T::zero() {
        pivot_min / pivot_max
    } else {
        T::zero()
    };

    if pivot_ratio <= T!(f64::EPSILON) * T::from_usize(100 * dimension).unwrap() {
        return Err(MosgimError::SingularMatrix {
            dimension,
            chunks,
            pivot_ratio,
        });
    }

    if pivot_ratio < T!(f64::EPSILON).sqrt() {
        warn!(
            "solve_normal_system: poorly conditioned normal system ({} unknowns, pivot ratio {})",
            dimension, pivot_ratio
        );
    }

    let solution = lu.solve(&normal.vector).ok_or(MosgimError::SingularMatrix {
        dimension,
        chunks,
        pivot_ratio,
    })?;

    if solution.iter().any(|value| !value.is_finite()) {
        return Err(MosgimError::NonFiniteSolution { dimension });
    }

    debug!(
        "solve_normal_system: {} unknowns (pivot ratio {}) in {:.2} sec",
        dimension,
        pivot_ratio,
        start.elapsed().as_millis() as f64 / 1e3
    );

    Ok(solution)
}

/// Build the partial normal systems of all chunks in parallel and sum them up.
///
/// The first failing chunk aborts the whole aggregation.
pub fn stack_normal_systems<T>(
    chunks: &[TecObsSeries<T>],
    indices: &HarmonicIndices,
    settings: &InversionSettings<T>,
) -> Result<NormalSystem<T>, MosgimError<T>>
where
    T: Copy + RealField + AsPrimitive<usize>,
{
    let start = Instant::now();

    let pool = ThreadPoolBuilder::new()
        .num_threads(settings.nworkers)
        .build()?;

    let mut normal = NormalSystem::zeros(indices.len() * settings.slices());

    let opt_partial = pool.install(|| {
        chunks
            .par_iter()
            .map(|chunk| construct_normal_system(chunk, indices, settings))
            .try_reduce_with(|acc, next| Ok(acc + next))
    });

    if let Some(partial) = opt_partial.transpose()? {
        normal += partial;
    }

    info!(
        "stack_normal_systems: {} chunks on {} workers in {:.2} sec",
        chunks.len(),
        settings.nworkers,
        start.elapsed().as_millis() as f64 / 1e3
    );

    Ok(normal)
}

/// Stack the normal systems of pre-split chunks, impose the temporal constraints and solve.
pub fn stack_weight_solve_ns<T>(
    chunks: &[TecObsSeries<T>],
    settings: &InversionSettings<T>,
) -> Result<InversionResult<T>, MosgimError<T>>
where
    T: Copy + RealField + AsPrimitive<usize>,
{
    settings.validate()?;

    let indices = HarmonicIndices::from_settings(settings);
    let n_coefs = indices.len();
    let slices = settings.slices();

    let mut normal = stack_normal_systems(chunks, &indices, settings)?;

    apply_temporal_constraints(
        &mut normal.matrix,
        n_coefs,
        slices,
        settings.regularization_weight(),
    );

    debug!(
        "stack_weight_solve_ns: constraints added ({} slices x {} coefs)",
        slices, n_coefs
    );

    let res = solve_normal_system(&normal, chunks.len())?;

    Ok(InversionResult {
        res,
        normal: normal.matrix,
        n_coefs,
        slices,
        linear: settings.linear,
    })
}

/// Solve a full observation series for the spherical harmonic coefficients of all time slices.
///
/// The series is validated, split into memory-bounded chunks and processed in parallel.
pub fn solve_weights<T>(
    series: &TecObsSeries<T>,
    settings: &InversionSettings<T>,
) -> Result<InversionResult<T>, MosgimError<T>>
where
    T: Copy + RealField + AsPrimitive<usize>,
{
    settings.validate()?;
    series.validate(settings.window())?;

    let nchunks = settings.chunk_count(series.len());

    info!(
        "solve_weights: nbig={}, mbig={}, nT={}, ndays={}, sigma0={}, sigma_v={}, observations={}, chunks={}",
        settings.y_order,
        settings.y_degree,
        settings.number_time_steps,
        settings.ndays,
        settings.sigma0,
        settings.sigma_v,
        series.len(),
        nchunks
    );

    stack_weight_solve_ns(&series.split(nchunks), settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{InversionSettingsBuilder, TecObs};
    use approx::relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_3, FRAC_PI_4, PI};

    fn random_series(len: usize, window: f64, rng: &mut impl Rng) -> TecObsSeries<f64> {
        (0..len)
            .map(|_| TecObs {
                time: rng.random_range(0.0..window),
                mlt: rng.random_range(0.0..std::f64::consts::TAU),
                mcolat: rng.random_range(0.1..3.0),
                el: rng.random_range(0.2..1.5),
                time_ref: rng.random_range(0.0..window),
                mlt_ref: rng.random_range(0.0..std::f64::consts::TAU),
                mcolat_ref: rng.random_range(0.1..3.0),
                el_ref: rng.random_range(0.2..1.5),
                rhs: rng.random_range(-5.0..5.0),
            })
            .collect()
    }

    #[test]
    fn test_temporal_constraints() {
        let mut matrix = DMatrix::<f64>::zeros(6, 6);

        apply_temporal_constraints(&mut matrix, 2, 3, 4.0);

        assert!(matrix == matrix.transpose());
        assert!(matrix[(0, 0)] == 4.0 && matrix[(2, 2)] == 8.0 && matrix[(4, 4)] == 4.0);
        assert!(matrix[(0, 2)] == -4.0 && matrix[(2, 0)] == -4.0);
        assert!(matrix[(3, 5)] == -4.0 && matrix[(5, 3)] == -4.0);
        assert!(matrix[(0, 1)] == 0.0 && matrix[(0, 4)] == 0.0);

        // Rows of the penalty sum up to zero.
        assert!(matrix.row_iter().all(|row| row.sum() == 0.0));

        let mut single = DMatrix::<f64>::zeros(2, 2);

        apply_temporal_constraints(&mut single, 2, 1, 4.0);

        assert!(single.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn test_chunked_stacking_is_invariant() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);

        for linear in [false, true] {
            let settings = InversionSettingsBuilder::<f64>::default()
                .y_order(3)
                .y_degree(3)
                .number_time_steps(4)
                .nworkers(2)
                .linear(linear)
                .build()
                .unwrap();

            let indices = HarmonicIndices::from_settings(&settings);
            let series = random_series(53, settings.window(), &mut rng);

            let reference = stack_normal_systems(&series.split(1), &indices, &settings).unwrap();

            for k in [2, 3, 7, 60] {
                let stacked =
                    stack_normal_systems(&series.split(k), &indices, &settings).unwrap();

                assert!(relative_eq!(
                    stacked.matrix,
                    reference.matrix,
                    epsilon = 1e-10,
                    max_relative = 1e-10
                ));
                assert!(relative_eq!(
                    stacked.vector,
                    reference.vector,
                    epsilon = 1e-10,
                    max_relative = 1e-10
                ));
            }
        }
    }

    #[test]
    fn test_coefficient_vector_length() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);

        for (linear, slices) in [(false, 3), (true, 4)] {
            let settings = InversionSettingsBuilder::<f64>::default()
                .y_order(2)
                .y_degree(1)
                .number_time_steps(3)
                .nworkers(1)
                .linear(linear)
                .build()
                .unwrap();

            let series = random_series(300, settings.window(), &mut rng);
            let result = solve_weights(&series, &settings).unwrap();

            assert!(result.n_coefs == 7);
            assert!(result.slices == slices);
            assert!(result.res.len() == 7 * slices);
            assert!(result.normal.shape() == (7 * slices, 7 * slices));
            assert!(result.time_slice(slices - 1).unwrap().len() == 7);
            assert!(result.time_slice(slices).is_none());
        }
    }

    #[test]
    fn test_result_save_load() {
        let result = InversionResult {
            res: DVector::from_vec(vec![1.5, -2.25, 0.125, 4.0]),
            normal: DMatrix::from_fn(4, 4, |row, col| (row * 4 + col) as f64 * 0.5),
            n_coefs: 2,
            slices: 2,
            linear: false,
        };

        let path = std::env::temp_dir().join("mosgim_result_save_load.json5");

        result.save(&path).unwrap();

        let loaded = InversionResult::<f64>::load(&path).unwrap();

        std::fs::remove_file(&path).unwrap();

        assert!(relative_eq!(loaded.res, result.res));
        assert!(relative_eq!(loaded.normal, result.normal));
        assert!(loaded.n_coefs == 2 && loaded.slices == 2 && !loaded.linear);
        assert!(loaded.time_slice(1).unwrap()[0] == 0.125);

        let err = InversionResult::<f64>::load(std::env::temp_dir().join("mosgim_missing.json5"))
            .unwrap_err();

        assert!(matches!(err, MosgimError::Io(_)));
    }

    #[test]
    fn test_two_observation_normal_system() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(2)
            .y_degree(2)
            .number_time_steps(2)
            .ndays(1)
            .linear(false)
            .build()
            .unwrap();

        let series: TecObsSeries<f64> = [
            TecObs {
                time: 1000.0,
                mlt: 0.0,
                mcolat: FRAC_PI_2,
                el: FRAC_PI_2,
                time_ref: 50000.0,
                mlt_ref: 0.0,
                mcolat_ref: 0.0,
                el_ref: FRAC_PI_2,
                rhs: 1.0,
            },
            TecObs {
                time: 60000.0,
                mlt: FRAC_PI_2,
                mcolat: FRAC_PI_2,
                el: FRAC_PI_2,
                time_ref: 2000.0,
                mlt_ref: 0.0,
                mcolat_ref: 0.0,
                el_ref: FRAC_PI_2,
                rhs: -0.5,
            },
        ]
        .into_iter()
        .collect();

        let c0 = 0.5 / PI.sqrt();
        let c1 = (3.0 / (4.0 * PI)).sqrt();
        let c20 = 0.25 * (5.0 / PI).sqrt();
        let c22 = 0.25 * (15.0 / PI).sqrt();

        // Basis at the equator (θ = 0 and θ = π/2) and at the pole.
        let equator_0 = [c0, 0.0, 0.0, c1, 0.0, 0.0, -c20, 0.0, c22];
        let equator_90 = [c0, c1, 0.0, 0.0, 0.0, 0.0, -c20, 0.0, -c22];
        let pole = [c0, 0.0, c1, 0.0, 0.0, 0.0, 2.0 * c20, 0.0, 0.0];

        let mut row_1 = DVector::<f64>::zeros(18);
        let mut row_2 = DVector::<f64>::zeros(18);

        for idx in 0..9 {
            row_1[idx] = equator_0[idx];
            row_1[9 + idx] = -pole[idx];
            row_2[idx] = -pole[idx];
            row_2[9 + idx] = equator_90[idx];
        }

        let expected_matrix = (&row_1 * row_1.transpose() + &row_2 * row_2.transpose()) * 0.5;
        let expected_vector = (&row_1 * 1.0 - &row_2 * 0.5) * 0.5;

        let indices = HarmonicIndices::from_settings(&settings);
        let normal = stack_normal_systems(&[series], &indices, &settings).unwrap();

        assert!(relative_eq!(normal.matrix, expected_matrix, epsilon = 1e-12));
        assert!(relative_eq!(normal.vector, expected_vector, epsilon = 1e-12));
    }

    #[test]
    fn test_least_squares_solution() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(0)
            .y_degree(0)
            .number_time_steps(2)
            .linear(false)
            .sigma_v(1e8)
            .nworkers(1)
            .build()
            .unwrap();

        let sf = crate::basis::SlantFactor::from_settings(&settings);
        let c0 = 0.5 / PI.sqrt();

        let sf_1 = sf.evaluate(FRAC_PI_4);
        let sf_2 = sf.evaluate(FRAC_PI_3);

        let truth = [3.0, 5.0];

        let series: TecObsSeries<f64> = [
            TecObs {
                time: 1000.0,
                mlt: 0.3,
                mcolat: 1.0,
                el: FRAC_PI_2,
                time_ref: 50000.0,
                mlt_ref: 0.2,
                mcolat_ref: 1.1,
                el_ref: FRAC_PI_4,
                rhs: c0 * (truth[0] - sf_1 * truth[1]),
            },
            TecObs {
                time: 60000.0,
                mlt: 1.3,
                mcolat: 2.0,
                el: FRAC_PI_3,
                time_ref: 2000.0,
                mlt_ref: 1.2,
                mcolat_ref: 0.4,
                el_ref: FRAC_PI_2,
                rhs: c0 * (sf_2 * truth[1] - truth[0]),
            },
        ]
        .into_iter()
        .collect();

        let result = solve_weights(&series, &settings).unwrap();

        assert!(relative_eq!(result.res[0], truth[0], epsilon = 1e-8));
        assert!(relative_eq!(result.res[1], truth[1], epsilon = 1e-8));
    }

    #[test]
    fn test_singular_system() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(1)
            .y_degree(1)
            .number_time_steps(2)
            .linear(false)
            .nworkers(1)
            .build()
            .unwrap();

        let err = solve_weights(&TecObsSeries::default(), &settings).unwrap_err();

        assert!(err.is_numerical_error());
        assert!(!err.is_input_error());
        assert!(matches!(
            err,
            MosgimError::SingularMatrix {
                dimension: 8,
                chunks: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_input_aborts() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(1)
            .y_degree(1)
            .number_time_steps(2)
            .nworkers(2)
            .build()
            .unwrap();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let series = random_series(20, settings.window(), &mut rng);

        let mut time = series.time().to_vec();
        time[17] = 2.0 * settings.window();

        let broken = TecObsSeries::new(
            time,
            series.mlt().to_vec(),
            series.mcolat().to_vec(),
            series.el().to_vec(),
            series.time_ref().to_vec(),
            series.mlt_ref().to_vec(),
            series.mcolat_ref().to_vec(),
            series.el_ref().to_vec(),
            series.rhs().to_vec(),
        )
        .unwrap();

        let err = solve_weights(&broken, &settings).unwrap_err();

        assert!(matches!(
            err,
            MosgimError::TimeOutOfRange {
                field: "time",
                index: 17,
                ..
            }
        ));

        // Chunk level failures propagate through the parallel reduction.
        let indices = HarmonicIndices::from_settings(&settings);
        let result = stack_normal_systems(&broken.split(4), &indices, &settings);

        assert!(result.unwrap_err().is_input_error());

        let invalid = InversionSettingsBuilder::<f64>::default()
            .memory_per_worker(0)
            .build()
            .unwrap();

        assert!(solve_weights(&series, &invalid).unwrap_err().is_config_error());
    }
}
