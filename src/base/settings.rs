use crate::{
    base::{EARTH_RADIUS, GB_CHUNK, IPP_HEIGHT, MosgimError, SECONDS_PER_DAY, SIGMA_V, SIGMA0},
    methods::TemporalBasis,
};
use derive_builder::Builder;
use nalgebra::RealField;
use serde::{Deserialize, Serialize};
use std::{io::Write, path::Path};

/// Inversion settings, shared by the normal system assembly, the solver and the map reconstruction.
///
/// The serialized field names match the external configuration options (`Y_order`, `Y_degree`,
/// `number_time_steps`, ...), missing values fall back to their defaults.
#[derive(Builder, Clone, Debug, Deserialize, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct InversionSettings<T>
where
    T: Copy + RealField,
{
    /// Maximum order `nbig` of the spherical harmonic expansion.
    #[builder(default = 15)]
    #[serde(rename = "Y_order", default = "default_order")]
    pub y_order: usize,

    /// Maximum degree `mbig` of the spherical harmonic expansion (`0 <= mbig <= nbig`).
    #[builder(default = 15)]
    #[serde(rename = "Y_degree", default = "default_order")]
    pub y_degree: usize,

    /// Number of time bins `nT` over the analysis window.
    #[builder(default = 24)]
    #[serde(default = "default_time_steps")]
    pub number_time_steps: usize,

    /// Length of the analysis window in days.
    #[builder(default = 1)]
    #[serde(default = "default_one")]
    pub ndays: usize,

    /// Latitude step of the output grid (in degrees).
    #[builder(default = T::from_f64(2.5).unwrap())]
    #[serde(default = "default_lat_step")]
    pub lat_step: T,

    /// Longitude step of the output grid (in degrees).
    #[builder(default = T::from_f64(5.0).unwrap())]
    #[serde(default = "default_lon_step")]
    pub lon_step: T,

    /// Number of parallel chunk builders.
    #[builder(default = 3)]
    #[serde(default = "default_nworkers")]
    pub nworkers: usize,

    /// Memory budget per worker (in gigabytes), determines the chunk size.
    #[builder(default = 2)]
    #[serde(default = "default_memory")]
    pub memory_per_worker: usize,

    /// Use a piecewise-linear (`true`) or piecewise-constant (`false`) temporal basis.
    #[builder(default = true)]
    #[serde(default = "default_linear")]
    pub linear: bool,

    /// Measurement noise at zenith (in TECU).
    #[builder(default = T::from_f64(SIGMA0).unwrap())]
    #[serde(default = "default_sigma0")]
    pub sigma0: T,

    /// Allowed variability of each coefficient between two consecutive time slices (in TECU).
    #[builder(default = T::from_f64(SIGMA_V).unwrap())]
    #[serde(default = "default_sigma_v")]
    pub sigma_v: T,

    /// Number of observations per chunk, per gigabyte of worker memory.
    #[builder(default = GB_CHUNK)]
    #[serde(default = "default_gb_chunk")]
    pub chunk_rows_per_gb: usize,

    /// Earth radius (in meters).
    #[builder(default = T::from_f64(EARTH_RADIUS).unwrap())]
    #[serde(default = "default_earth_radius")]
    pub earth_radius: T,

    /// Ionospheric shell height (in meters).
    #[builder(default = T::from_f64(IPP_HEIGHT).unwrap())]
    #[serde(default = "default_ipp_height")]
    pub ipp_height: T,
}

impl<T> InversionSettings<T>
where
    T: Copy + RealField,
{
    /// Length of a single time bin (in seconds).
    pub fn bin_width(&self) -> T {
        self.window() / T::from_usize(self.number_time_steps).unwrap()
    }

    /// Number of chunks used for `n_obs` observations.
    pub fn chunk_count(&self, n_obs: usize) -> usize {
        (n_obs / self.chunk_size()).max(1)
    }

    /// Maximum number of observations per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_rows_per_gb * self.memory_per_worker
    }

    /// Load settings from a JSON5 file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MosgimError<T>>
    where
        Self: for<'de> Deserialize<'de>,
    {
        let content = std::fs::read_to_string(path)?;

        let settings: Self =
            serde_json5::from_str(&content).map_err(|err| MosgimError::Serde(err.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Returns the number of spherical harmonic basis functions.
    ///
    /// Equal to the length of [`HarmonicIndices`](`crate::basis::HarmonicIndices`) for the same
    /// orders and degrees.
    pub fn n_coefs(&self) -> usize {
        let nbig = self.y_order;
        let mbig = self.y_degree.min(nbig);

        (nbig + 1).pow(2) - (nbig - mbig) * (nbig - mbig + 1)
    }

    /// Returns the total number of unknowns, i.e. the length of the coefficient vector.
    pub fn n_unknowns(&self) -> usize {
        self.n_coefs() * self.slices()
    }

    /// Returns the regularization weight `(σ0 / σv)^2`.
    pub fn regularization_weight(&self) -> T {
        (self.sigma0 / self.sigma_v).powi(2)
    }

    /// Serialize settings to a JSON5 file.
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

    /// Number of time slices in the coefficient vector.
    pub fn slices(&self) -> usize {
        self.number_time_steps + self.temporal_basis().extra_slices()
    }

    /// Returns the temporal basis variant.
    pub fn temporal_basis(&self) -> TemporalBasis {
        if self.linear {
            TemporalBasis::Linear
        } else {
            TemporalBasis::Constant
        }
    }

    /// Check the settings for invalid values.
    pub fn validate(&self) -> Result<(), MosgimError<T>> {
        let positive = |name: &'static str, value: T| {
            if value > T::zero() && value.is_finite() {
                Ok(())
            } else {
                Err(MosgimError::InvalidSetting {
                    name,
                    msg: format!("must be positive and finite, found {}", value),
                })
            }
        };

        let nonzero = |name: &'static str, value: usize| {
            if value > 0 {
                Ok(())
            } else {
                Err(MosgimError::InvalidSetting {
                    name,
                    msg: "must be larger than zero".to_string(),
                })
            }
        };

        if self.y_degree > self.y_order {
            return Err(MosgimError::InvalidSetting {
                name: "Y_degree",
                msg: format!(
                    "maximum degree {} exceeds maximum order {}",
                    self.y_degree, self.y_order
                ),
            });
        }

        nonzero("number_time_steps", self.number_time_steps)?;
        nonzero("ndays", self.ndays)?;
        nonzero("nworkers", self.nworkers)?;
        nonzero("memory_per_worker", self.memory_per_worker)?;
        nonzero("chunk_rows_per_gb", self.chunk_rows_per_gb)?;

        positive("lat_step", self.lat_step)?;
        positive("lon_step", self.lon_step)?;
        positive("sigma0", self.sigma0)?;
        positive("sigma_v", self.sigma_v)?;
        positive("earth_radius", self.earth_radius)?;
        positive("ipp_height", self.ipp_height)?;

        Ok(())
    }

    /// Length of the analysis window (in seconds).
    pub fn window(&self) -> T {
        T::from_usize(self.ndays).unwrap() * T::from_f64(SECONDS_PER_DAY).unwrap()
    }
}

fn default_order() -> usize {
    15
}

fn default_time_steps() -> usize {
    24
}

fn default_one() -> usize {
    1
}

fn default_nworkers() -> usize {
    3
}

fn default_memory() -> usize {
    2
}

fn default_linear() -> bool {
    true
}

fn default_gb_chunk() -> usize {
    GB_CHUNK
}

fn default_lat_step<T: RealField>() -> T {
    T::from_f64(2.5).unwrap()
}

fn default_lon_step<T: RealField>() -> T {
    T::from_f64(5.0).unwrap()
}

fn default_sigma0<T: RealField>() -> T {
    T::from_f64(SIGMA0).unwrap()
}

fn default_sigma_v<T: RealField>() -> T {
    T::from_f64(SIGMA_V).unwrap()
}

fn default_earth_radius<T: RealField>() -> T {
    T::from_f64(EARTH_RADIUS).unwrap()
}

fn default_ipp_height<T: RealField>() -> T {
    T::from_f64(IPP_HEIGHT).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::ulps_eq;

    #[test]
    fn test_settings_defaults() {
        let settings = InversionSettingsBuilder::<f64>::default().build().unwrap();

        assert!(settings.validate().is_ok());
        assert!(settings.n_coefs() == 256);
        assert!(settings.slices() == 25);
        assert!(settings.n_unknowns() == 256 * 25);
        assert!(settings.chunk_size() == 30000);
        assert!(ulps_eq!(settings.bin_width(), 3600.0));
        assert!(ulps_eq!(settings.regularization_weight(), 25.0, max_ulps = 8));
    }

    #[test]
    fn test_settings_slices() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .linear(false)
            .y_order(4)
            .y_degree(2)
            .build()
            .unwrap();

        assert!(settings.slices() == 24);
        assert!(settings.n_coefs() == 25 - 2 * 3);
    }

    #[test]
    fn test_settings_chunk_count() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .chunk_rows_per_gb(10)
            .memory_per_worker(1)
            .build()
            .unwrap();

        assert!(settings.chunk_count(0) == 1);
        assert!(settings.chunk_count(9) == 1);
        assert!(settings.chunk_count(10) == 1);
        assert!(settings.chunk_count(29) == 2);
        assert!(settings.chunk_count(30) == 3);
    }

    #[test]
    fn test_settings_validate() {
        let settings = InversionSettingsBuilder::<f64>::default()
            .y_order(2)
            .y_degree(3)
            .build()
            .unwrap();

        assert!(matches!(
            settings.validate(),
            Err(MosgimError::InvalidSetting {
                name: "Y_degree",
                ..
            })
        ));

        let settings = InversionSettingsBuilder::<f64>::default()
            .nworkers(0)
            .build()
            .unwrap();

        assert!(settings.validate().unwrap_err().is_config_error());

        let settings = InversionSettingsBuilder::<f64>::default()
            .number_time_steps(0)
            .build()
            .unwrap();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_deserialize() {
        let settings: InversionSettings<f64> =
            serde_json5::from_str("{Y_order: 2, Y_degree: 1, linear: false, lat_step: 5.0}")
                .unwrap();

        assert!(settings.y_order == 2);
        assert!(settings.y_degree == 1);
        assert!(!settings.linear);
        assert!(settings.number_time_steps == 24);
        assert!(settings.nworkers == 3);
        assert!(ulps_eq!(settings.lat_step, 5.0));
        assert!(ulps_eq!(settings.lon_step, 5.0));
        assert!(ulps_eq!(settings.sigma0, SIGMA0));
    }
}
