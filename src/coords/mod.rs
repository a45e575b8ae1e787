//! # Magnetic coordinate frames.
//!
//! The inversion works in a magnetic frame, where each point is given by its magnetic
//! co-latitude and the magnetic local time (MLT) expressed as an angle in `[0, 2π)`. The
//! [`MagneticTransform`] trait converts geographic co-latitude and longitude (in radians) into
//! this frame for a given absolute time.
//!
//! Currently implemented frames:
//! - [`CentredDipole`] Geomagnetic coordinates of a centred dipole (`mag`).
//! - [`ModipDipole`] Modified dip latitude derived from the dipole inclination (`mdip`).

mod dipole;
mod solar;

pub use dipole::*;
pub use solar::subsolar_point;

use crate::base::MosgimError;
use chrono::NaiveDateTime;
use itertools::zip_eq;
use nalgebra::RealField;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A trait that is shared by all magnetic coordinate frames.
pub trait MagneticTransform<T>: Send + Sync
where
    T: Copy + RealField,
{
    /// Transform geographic co-latitude and longitude into magnetic co-latitude and the MLT angle.
    fn transform(&self, colat: T, lon: T, time: &NaiveDateTime) -> (T, T);

    /// Transform a series of geographic positions at a single time.
    fn transform_all(&self, colat: &[T], lon: &[T], time: &NaiveDateTime) -> (Vec<T>, Vec<T>) {
        zip_eq(colat, lon)
            .map(|(colat, lon)| self.transform(*colat, *lon, time))
            .unzip()
    }
}

/// Selector for the magnetic coordinate frame of the reconstructed maps.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum MagneticCoordType {
    /// Centred dipole geomagnetic coordinates.
    #[serde(rename = "mag")]
    Mag,
    /// Modified dip (modip) coordinates.
    #[serde(rename = "mdip")]
    Mdip,
}

impl MagneticCoordType {
    /// Parse a selector string (`mag` or `mdip`).
    pub fn from_selector<T>(selector: &str) -> Result<Self, MosgimError<T>> {
        match selector {
            "mag" => Ok(Self::Mag),
            "mdip" => Ok(Self::Mdip),
            _ => Err(MosgimError::UnsupportedCoords(selector.to_string())),
        }
    }
}

impl Display for MagneticCoordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mag => write!(f, "mag"),
            Self::Mdip => write!(f, "mdip"),
        }
    }
}

impl<T> MagneticTransform<T> for MagneticCoordType
where
    T: Copy + RealField,
{
    fn transform(&self, colat: T, lon: T, time: &NaiveDateTime) -> (T, T) {
        match self {
            Self::Mag => CentredDipole::default().transform(colat, lon, time),
            Self::Mdip => ModipDipole::default().transform(colat, lon, time),
        }
    }
}

/// Wrap an angle into `[0, 2π)`.
pub fn wrap_angle<T>(angle: T) -> T
where
    T: Copy + RealField,
{
    let tau = T::two_pi();
    let wrapped = angle % tau;

    if wrapped < T::zero() {
        wrapped + tau
    } else {
        wrapped
    }
}
