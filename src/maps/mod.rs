//! # Global TEC map reconstruction.
//!
//! A solved coefficient vector is turned into a series of vertical TEC maps, one per time step,
//! on a regular geographic grid. Each grid point is transformed into the requested magnetic frame
//! at the absolute time of its map before the real spherical harmonic basis is evaluated.

use crate::{
    base::{InversionSettings, MosgimError, SECONDS_PER_DAY},
    basis::HarmonicIndices,
    coords::{MagneticCoordType, MagneticTransform},
    math::T,
    methods::InversionResult,
};
use chrono::{NaiveDateTime, TimeDelta};
use derive_more::Deref;
use log::info;
use nalgebra::{DMatrix, DVector, RealField};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Instant};

/// The regular geographic output grid, in degrees.
///
/// Co-latitudes start at `lat_step` and stay below 180°, longitudes run from -180° up to and
/// including 180°.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MapGrid<T> {
    colat: Vec<T>,
    lon: Vec<T>,
}

impl<T> MapGrid<T>
where
    T: Copy + RealField,
{
    /// Co-latitudes of the grid rows (in degrees).
    pub fn colat(&self) -> &[T] {
        &self.colat
    }

    /// Create the grid from the inversion settings.
    pub fn from_settings(settings: &InversionSettings<T>) -> Self {
        Self::new(settings.lat_step, settings.lon_step)
    }

    /// Latitudes `90° - colat` of all grid points, one row per co-latitude.
    pub fn lats(&self) -> DMatrix<T> {
        DMatrix::from_fn(self.colat.len(), self.lon.len(), |row, _| {
            T!(90.0) - self.colat[row]
        })
    }

    /// Longitudes of the grid columns (in degrees).
    pub fn lon(&self) -> &[T] {
        &self.lon
    }

    /// Longitudes of all grid points, one row per co-latitude.
    pub fn lons(&self) -> DMatrix<T> {
        DMatrix::from_fn(self.colat.len(), self.lon.len(), |_, col| self.lon[col])
    }

    /// Create a new [`MapGrid`] with the given steps (in degrees).
    pub fn new(lat_step: T, lon_step: T) -> Self {
        let colat = (1..)
            .map(|idx| lat_step * T::from_usize(idx).unwrap())
            .take_while(|value| *value < T!(180.0))
            .collect();

        let tolerance = lon_step * T!(1e-9);

        let lon = (0..)
            .map(|idx| T!(-180.0) + lon_step * T::from_usize(idx).unwrap())
            .take_while(|value| *value <= T!(180.0) + tolerance)
            .collect();

        Self { colat, lon }
    }

    /// All grid points in radians, flattened row by row as `(colat, lon)`.
    pub fn points(&self) -> (Vec<T>, Vec<T>) {
        let deg2rad = T::pi() / T!(180.0);

        self.colat
            .iter()
            .flat_map(|colat| {
                self.lon
                    .iter()
                    .map(move |lon| (*colat * deg2rad, *lon * deg2rad))
            })
            .unzip()
    }

    /// Returns the grid shape `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.colat.len(), self.lon.len())
    }
}

/// Reconstructed TEC maps, keyed by the zero-padded time step (`time00`, `time01`, ...).
#[derive(Clone, Debug, Deref, Deserialize, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct TecMaps<T>
where
    T: Copy + RealField,
{
    /// Longitudes of the grid points (in degrees).
    pub lons: DMatrix<T>,

    /// Latitudes of the grid points (in degrees).
    pub lats: DMatrix<T>,

    /// One map per time step.
    #[deref]
    pub maps: BTreeMap<String, DMatrix<T>>,
}

/// Returns the absolute time of map `k`, i.e. `date + k * ndays * 86400 / nT` seconds.
pub fn map_time<T>(
    date: &NaiveDateTime,
    k: usize,
    settings: &InversionSettings<T>,
) -> NaiveDateTime
where
    T: Copy + RealField,
{
    let seconds =
        SECONDS_PER_DAY * (settings.ndays * k) as f64 / settings.number_time_steps as f64;

    *date + TimeDelta::milliseconds((seconds * 1e3).round() as i64)
}

/// Reconstruct the TEC maps of an inversion result in the magnetic frame `mag_type` (`mag` or
/// `mdip`).
///
/// An unsupported frame selector fails before any map is computed.
pub fn calculate_maps<T>(
    result: &InversionResult<T>,
    mag_type: &str,
    date: &NaiveDateTime,
    settings: &InversionSettings<T>,
) -> Result<TecMaps<T>, MosgimError<T>>
where
    T: Copy + RealField,
{
    let coords = MagneticCoordType::from_selector(mag_type)?;

    calculate_maps_with(&result.res, &coords, date, settings)
}

/// Reconstruct the TEC maps of a coefficient vector with an arbitrary magnetic transform.
pub fn calculate_maps_with<T, M>(
    coefs: &DVector<T>,
    transform: &M,
    date: &NaiveDateTime,
    settings: &InversionSettings<T>,
) -> Result<TecMaps<T>, MosgimError<T>>
where
    T: Copy + RealField,
    M: MagneticTransform<T>,
{
    settings.validate()?;

    let start = Instant::now();

    let indices = HarmonicIndices::from_settings(settings);
    let n_coefs = indices.len();

    if coefs.len() != settings.n_unknowns() {
        return Err(MosgimError::InputShape {
            field: "res",
            expected: settings.n_unknowns(),
            found: coefs.len(),
        });
    }

    let grid = MapGrid::from_settings(settings);
    let (rows, cols) = grid.shape();
    let (colat, lon) = grid.points();

    let maps = (0..settings.number_time_steps)
        .into_par_iter()
        .map(|k| {
            let time = map_time(date, k, settings);
            let (mcolat, mlt) = transform.transform_all(&colat, &lon, &time);

            let basis = indices.evaluate_matrix(&mlt, &mcolat, None);
            let values = basis * coefs.rows(k * n_coefs, n_coefs);

            (
                format!("time{:02}", k),
                DMatrix::from_row_slice(rows, cols, values.as_slice()),
            )
        })
        .collect::<BTreeMap<_, _>>();

    info!(
        "calculate_maps: {} maps ({} x {} grid) in {:.2} sec",
        maps.len(),
        rows,
        cols,
        start.elapsed().as_millis() as f64 / 1e3
    );

    Ok(TecMaps {
        lons: grid.lons(),
        lats: grid.lats(),
        maps,
    })
}
