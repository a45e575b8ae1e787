use crate::{
    base::{InversionSettings, MosgimError, TecObsSeries},
    basis::HarmonicIndices,
    methods::{DesignMatrix, observation_weights},
};
use log::debug;
use nalgebra::{DVector, RealField};
use num_traits::AsPrimitive;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Compute the differenced TEC values `A * x` that a coefficient vector predicts for the
/// observation geometry of `series`.
///
/// The right-hand side of `series` is ignored.
pub fn simulate_rhs<T>(
    coefs: &DVector<T>,
    series: &TecObsSeries<T>,
    settings: &InversionSettings<T>,
) -> Result<DVector<T>, MosgimError<T>>
where
    T: Copy + RealField + AsPrimitive<usize>,
{
    let indices = HarmonicIndices::from_settings(settings);
    let design = DesignMatrix::assemble(series, &indices, settings)?;

    if coefs.len() != design.ncols() {
        return Err(MosgimError::InputShape {
            field: "coefs",
            expected: design.ncols(),
            found: coefs.len(),
        });
    }

    Ok(design.mul_vector(coefs))
}

/// Zero-mean Gaussian noise with the elevation dependent standard deviation `σ0 / sqrt(w)`,
/// where `w` is the observation weight.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GaussianNoise<T> {
    /// Noise at zenith.
    pub sigma0: T,

    /// Random seed.
    pub random_seed: u64,
}

impl<T> GaussianNoise<T>
where
    T: Copy + RealField,
    StandardNormal: Distribution<T>,
{
    /// Add noise to a noise-free right-hand side.
    pub fn apply(&self, rhs: &DVector<T>, series: &TecObsSeries<T>) -> DVector<T> {
        let mut rng = self.initialize_rng();

        rhs + self.generate_noise(series, &mut rng)
    }

    /// Generate a random noise vector for the observation geometry of `series`.
    pub fn generate_noise(&self, series: &TecObsSeries<T>, rng: &mut impl Rng) -> DVector<T> {
        let weights = observation_weights(series.el(), series.el_ref());

        debug!(
            "GaussianNoise::generate_noise: {} samples (sigma0={}, seed={})",
            weights.len(),
            self.sigma0,
            self.random_seed
        );

        DVector::from_iterator(
            weights.len(),
            weights
                .iter()
                .map(|weight| self.sigma0 / weight.sqrt() * rng.sample::<T, _>(StandardNormal)),
        )
    }

    /// Initialize a new random number generator using the seed.
    pub fn initialize_rng(&self) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(self.random_seed)
    }

    /// Create a new [`GaussianNoise`].
    pub fn new(sigma0: T, random_seed: u64) -> Self {
        Self {
            sigma0,
            random_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{InversionSettingsBuilder, TecObs};
    use crate::methods::solve_weights;
    use approx::relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_6, TAU};

    fn geometry(len: usize, window: f64, rng: &mut impl Rng) -> TecObsSeries<f64> {
        (0..len)
            .map(|_| TecObs {
                time: rng.random_range(0.0..window),
                mlt: rng.random_range(0.0..TAU),
                mcolat: rng.random_range(0.1..3.0),
                el: rng.random_range(0.3..1.5),
                time_ref: rng.random_range(0.0..window),
                mlt_ref: rng.random_range(0.0..TAU),
                mcolat_ref: rng.random_range(0.1..3.0),
                el_ref: rng.random_range(0.3..1.5),
                rhs: 0.0,
            })
            .collect()
    }

    #[test]
    fn test_simulate_rhs() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(0)
            .y_degree(0)
            .number_time_steps(2)
            .linear(false)
            .build()
            .unwrap();

        let series: TecObsSeries<f64> = [TecObs {
            time: 100.0,
            mlt: 0.0,
            mcolat: 1.0,
            el: FRAC_PI_2,
            time_ref: 50000.0,
            mlt_ref: 0.0,
            mcolat_ref: 1.0,
            el_ref: FRAC_PI_2,
            rhs: 0.0,
        }]
        .into_iter()
        .collect();

        let c0 = 0.5 / std::f64::consts::PI.sqrt();
        let rhs = simulate_rhs(&DVector::from_vec(vec![2.0, 7.0]), &series, &settings).unwrap();

        assert!(relative_eq!(rhs[0], c0 * (2.0 - 7.0), epsilon = 1e-12));

        let err = simulate_rhs(&DVector::from_vec(vec![2.0]), &series, &settings).unwrap_err();

        assert!(matches!(
            err,
            MosgimError::InputShape {
                field: "coefs",
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_gaussian_noise() {
        let noise = GaussianNoise::new(0.5, 17);

        let series: TecObsSeries<f64> = (0..20000)
            .map(|idx| TecObs {
                time: idx as f64,
                mlt: 0.0,
                mcolat: 1.0,
                el: FRAC_PI_6,
                time_ref: idx as f64,
                mlt_ref: 0.0,
                mcolat_ref: 1.0,
                el_ref: FRAC_PI_2,
                rhs: 0.0,
            })
            .collect();

        let zeros = DVector::zeros(series.len());

        let first = noise.apply(&zeros, &series);
        let second = noise.apply(&zeros, &series);

        assert!(first == second);

        // w = 0.25 / 1.25, so the expected standard deviation is 0.5 * sqrt(5).
        let mean = first.mean();
        let std_dev = first.variance().sqrt();

        assert!(mean.abs() < 0.05);
        assert!(relative_eq!(std_dev, 0.5 * 5.0_f64.sqrt(), max_relative = 0.03));
    }

    #[test]
    fn test_recover_simulated_coefficients() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(2)
            .y_degree(2)
            .number_time_steps(2)
            .nworkers(2)
            .memory_per_worker(1)
            .chunk_rows_per_gb(250)
            .build()
            .unwrap();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);

        let n_coefs = settings.n_coefs();
        let block = DVector::<f64>::from_iterator(
            n_coefs,
            (0..n_coefs).map(|_| rng.random_range(-3.0..3.0)),
        );

        // Identical slices, the temporal constraints are satisfied exactly.
        let truth = DVector::from_iterator(
            settings.n_unknowns(),
            (0..settings.slices()).flat_map(|_| block.iter().copied()),
        );

        let series = geometry(1000, settings.window(), &mut rng);
        let rhs = simulate_rhs(&truth, &series, &settings).unwrap();

        let series = series.with_rhs(rhs.as_slice().to_vec()).unwrap();
        let result = solve_weights(&series, &settings).unwrap();

        assert!(relative_eq!(result.res, truth, epsilon = 1e-6));
    }
}
